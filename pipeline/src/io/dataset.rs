//! Tabular data access for the base dataset and artifact tables.
//!
//! Columns are opaque named fields; nothing here assumes fixed names. All
//! cross-table combination goes through identifier-based joins, never
//! positional alignment, because artifact tables are column-sparse.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use csv::{ReaderBuilder, WriterBuilder};

/// An in-memory table: a header row plus string cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(anyhow!(
                "row width {} does not match {} columns",
                row.len(),
                self.columns.len()
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Read a CSV file with a header row.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("open table {}", path.display()))?;
        let mut reader = ReaderBuilder::new().flexible(false).from_reader(file);
        let columns: Vec<String> = reader
            .headers()
            .with_context(|| format!("read header of {}", path.display()))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.with_context(|| format!("read record from {}", path.display()))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { columns, rows })
    }

    /// Write the table as CSV with a header row.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut writer = WriterBuilder::new()
            .from_path(path)
            .with_context(|| format!("create table {}", path.display()))?;
        writer
            .write_record(&self.columns)
            .with_context(|| format!("write header of {}", path.display()))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .with_context(|| format!("write record to {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("flush table {}", path.display()))
    }

    /// Project onto `wanted` columns, in the given order.
    pub fn select(&self, wanted: &[String]) -> Result<Self> {
        let mut indices = Vec::with_capacity(wanted.len());
        for name in wanted {
            let index = self
                .column_index(name)
                .ok_or_else(|| anyhow!("column '{}' not found in table", name))?;
            indices.push(index);
        }
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|index| row[*index].clone()).collect())
            .collect();
        Ok(Self {
            columns: wanted.to_vec(),
            rows,
        })
    }

    /// Left-join `other` onto `self` by the `on` key columns.
    ///
    /// Every row of `self` is kept; the first matching row of `other`
    /// contributes its non-key columns, empty cells otherwise.
    pub fn left_join(&self, other: &Self, on: &[String]) -> Result<Self> {
        let left_keys = key_indices(self, on)?;
        let right_keys = key_indices(other, on)?;

        let carried: Vec<usize> = (0..other.columns.len())
            .filter(|index| !right_keys.contains(index))
            .collect();
        for index in &carried {
            let name = &other.columns[*index];
            if self.column_index(name).is_some() {
                return Err(anyhow!("join would duplicate column '{}'", name));
            }
        }

        let mut lookup: HashMap<Vec<&str>, &Vec<String>> = HashMap::new();
        for row in &other.rows {
            let key: Vec<&str> = right_keys.iter().map(|index| row[*index].as_str()).collect();
            lookup.entry(key).or_insert(row);
        }

        let mut columns = self.columns.clone();
        columns.extend(carried.iter().map(|index| other.columns[*index].clone()));

        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let key: Vec<&str> = left_keys.iter().map(|index| row[*index].as_str()).collect();
            let mut joined = row.clone();
            match lookup.get(&key) {
                Some(matched) => {
                    joined.extend(carried.iter().map(|index| matched[*index].clone()));
                }
                None => {
                    joined.extend(carried.iter().map(|_| String::new()));
                }
            }
            rows.push(joined);
        }

        Ok(Self { columns, rows })
    }

    /// Crude type tag for a column, used to describe inputs in prompts.
    pub fn infer_dtype(&self, name: &str) -> &'static str {
        let Some(index) = self.column_index(name) else {
            return "str";
        };
        let mut saw_float = false;
        let mut saw_value = false;
        for row in &self.rows {
            let cell = row[index].trim();
            if cell.is_empty() {
                continue;
            }
            saw_value = true;
            if cell.parse::<i64>().is_ok() {
                continue;
            }
            if cell.parse::<f64>().is_ok() {
                saw_float = true;
                continue;
            }
            return "str";
        }
        match (saw_value, saw_float) {
            (false, _) => "str",
            (true, true) => "float",
            (true, false) => "int",
        }
    }
}

/// Read only the header row of a CSV file.
pub fn read_header(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("open table {}", path.display()))?;
    let mut reader = ReaderBuilder::new().from_reader(file);
    let columns = reader
        .headers()
        .with_context(|| format!("read header of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();
    Ok(columns)
}

fn key_indices(table: &Table, on: &[String]) -> Result<Vec<usize>> {
    on.iter()
        .map(|name| {
            table
                .column_index(name)
                .ok_or_else(|| anyhow!("join key column '{}' not found", name))
        })
        .collect()
}
