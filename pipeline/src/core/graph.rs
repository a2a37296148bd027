//! Task graph construction and topological ordering.
//!
//! The graph is built once per run, before any generation or execution cost is
//! spent, and is immutable afterwards. Every input variable must resolve to a
//! base-dataset column or to exactly one upstream task's output.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::core::types::TaskSpec;

/// Why a task list could not be assembled into a valid graph.
///
/// These are fatal and reported before any execution begins, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate task id '{task_id}'")]
    DuplicateTask { task_id: String },
    #[error("output variable '{variable}' is claimed by both '{first}' and '{second}'")]
    AmbiguousOutput {
        variable: String,
        first: String,
        second: String,
    },
    #[error("task '{task_id}' output '{variable}' shadows a base dataset column")]
    OutputShadowsBase { task_id: String, variable: String },
    #[error(
        "task '{task_id}' reads '{variable}' but no base column or upstream task provides it"
    )]
    UnresolvedInput { task_id: String, variable: String },
    #[error("dependency cycle: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },
}

/// Where an input variable comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// A column of the base dataset.
    Base,
    /// The output of another task.
    Task(String),
}

/// Validated, immutable dependency graph over a task list.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: BTreeMap<String, TaskSpec>,
    providers: BTreeMap<String, Provider>,
    edges: Vec<(String, String)>,
    order: Vec<String>,
}

impl TaskGraph {
    /// Resolve providers, build edges, and topologically sort the tasks.
    ///
    /// The returned order is deterministic for a fixed task list: ready tasks
    /// are released in lexicographic id order.
    pub fn build(specs: &[TaskSpec], base_columns: &[String]) -> Result<Self, GraphError> {
        let mut tasks = BTreeMap::new();
        for spec in specs {
            if tasks.insert(spec.task_id.clone(), spec.clone()).is_some() {
                return Err(GraphError::DuplicateTask {
                    task_id: spec.task_id.clone(),
                });
            }
        }

        let mut providers: BTreeMap<String, Provider> = base_columns
            .iter()
            .map(|column| (column.clone(), Provider::Base))
            .collect();
        for spec in specs {
            for variable in &spec.output_variables {
                match providers.get(variable) {
                    Some(Provider::Base) => {
                        return Err(GraphError::OutputShadowsBase {
                            task_id: spec.task_id.clone(),
                            variable: variable.clone(),
                        });
                    }
                    Some(Provider::Task(first)) => {
                        return Err(GraphError::AmbiguousOutput {
                            variable: variable.clone(),
                            first: first.clone(),
                            second: spec.task_id.clone(),
                        });
                    }
                    None => {
                        providers.insert(variable.clone(), Provider::Task(spec.task_id.clone()));
                    }
                }
            }
        }

        let mut edges = Vec::new();
        let mut edge_set = BTreeSet::new();
        for spec in specs {
            for variable in &spec.input_variables {
                match providers.get(variable) {
                    None => {
                        return Err(GraphError::UnresolvedInput {
                            task_id: spec.task_id.clone(),
                            variable: variable.clone(),
                        });
                    }
                    Some(Provider::Base) => {}
                    Some(Provider::Task(provider)) => {
                        let edge = (provider.clone(), spec.task_id.clone());
                        if edge_set.insert(edge.clone()) {
                            edges.push(edge);
                        }
                    }
                }
            }
        }

        let order = topological_order(&tasks, &edges)?;

        Ok(Self {
            tasks,
            providers,
            edges,
            order,
        })
    }

    /// Task ids in dependency-respecting execution order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskSpec> {
        self.tasks.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Provider of a variable, if any task or base column supplies it.
    pub fn provider_of(&self, variable: &str) -> Option<&Provider> {
        self.providers.get(variable)
    }

    /// Provider edges as `(upstream, downstream)` pairs.
    pub fn edges(&self) -> &[(String, String)] {
        &self.edges
    }

    /// Input variables of `task_id` satisfied by the base dataset, in
    /// declaration order.
    pub fn base_inputs_of(&self, task_id: &str) -> Vec<String> {
        let Some(spec) = self.tasks.get(task_id) else {
            return Vec::new();
        };
        spec.input_variables
            .iter()
            .filter(|variable| matches!(self.providers.get(*variable), Some(Provider::Base)))
            .cloned()
            .collect()
    }

    /// Upstream tasks of `task_id`, mapped to the variables consumed from each.
    pub fn dependencies_of(&self, task_id: &str) -> BTreeMap<String, Vec<String>> {
        let mut deps: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let Some(spec) = self.tasks.get(task_id) else {
            return deps;
        };
        for variable in &spec.input_variables {
            if let Some(Provider::Task(provider)) = self.providers.get(variable) {
                deps.entry(provider.clone())
                    .or_default()
                    .push(variable.clone());
            }
        }
        deps
    }

    /// Tasks that consume at least one output of `task_id`.
    pub fn dependents_of(&self, task_id: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .edges
            .iter()
            .filter(|(upstream, _)| upstream == task_id)
            .map(|(_, downstream)| downstream.clone())
            .collect();
        dependents.sort();
        dependents.dedup();
        dependents
    }
}

/// Kahn's algorithm with a lexicographic ready set.
///
/// Any residue left with unresolved in-degrees is a cycle; it is named by
/// walking successor links through the residue until a task repeats.
fn topological_order(
    tasks: &BTreeMap<String, TaskSpec>,
    edges: &[(String, String)],
) -> Result<Vec<String>, GraphError> {
    let mut in_degree: BTreeMap<&str, usize> =
        tasks.keys().map(|id| (id.as_str(), 0)).collect();
    for (_, downstream) in edges {
        if let Some(count) = in_degree.get_mut(downstream.as_str()) {
            *count += 1;
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(next) = ready.iter().next().copied() {
        ready.remove(next);
        order.push(next.to_string());
        for (upstream, downstream) in edges {
            if upstream == next {
                let count = in_degree
                    .get_mut(downstream.as_str())
                    .expect("edge endpoints are known tasks");
                *count -= 1;
                if *count == 0 {
                    ready.insert(downstream.as_str());
                }
            }
        }
    }

    if order.len() == tasks.len() {
        return Ok(order);
    }

    let residue: BTreeSet<&str> = tasks
        .keys()
        .map(String::as_str)
        .filter(|id| !order.iter().any(|done| done == id))
        .collect();
    Err(GraphError::Cycle {
        cycle: name_cycle(&residue, edges),
    })
}

fn name_cycle(residue: &BTreeSet<&str>, edges: &[(String, String)]) -> Vec<String> {
    // Walk predecessor links: every residue task still has positive in-degree,
    // so a residue predecessor always exists and the walk must revisit a task.
    let start = residue.iter().next().copied().unwrap_or_default();
    let mut path = vec![start];
    let mut seen: BTreeSet<&str> = BTreeSet::from([start]);
    let mut current = start;
    loop {
        let next = edges
            .iter()
            .find_map(|(upstream, downstream)| {
                (downstream == current && residue.contains(upstream.as_str()))
                    .then_some(upstream.as_str())
            })
            .expect("residue tasks have a residue predecessor");
        if !seen.insert(next) {
            // Trim the lead-in, then flip into dependency direction.
            let entry = path.iter().position(|id| *id == next).unwrap_or_default();
            let mut cycle: Vec<String> = path[entry..]
                .iter()
                .rev()
                .map(|id| (*id).to_string())
                .collect();
            cycle.push(cycle[0].clone());
            return cycle;
        }
        path.push(next);
        current = next;
    }
}
