//! Generation-request builder for the synthesis loop.
//!
//! Requests are rendered from a template and assembled under a byte budget:
//! droppable sections go first, and the last section is truncated as a final
//! resort, so a request never exceeds what the backend can accept.

use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

const SYNTHESIZE_TEMPLATE: &str = include_str!("prompts/synthesize.md");

/// One column shown to the model, with its crude type tag.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: Option<String>,
}

/// Prior attempt context carried into a revision request.
#[derive(Debug, Clone, Serialize)]
pub struct PriorAttempt {
    pub code: Option<String>,
    pub diagnostic: String,
    pub hint: String,
}

/// All inputs needed to build a generation request.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub task_id: String,
    pub objective: String,
    pub row_count: usize,
    pub input_columns: Vec<ColumnInfo>,
    pub id_columns: Vec<String>,
    pub output_columns: Vec<ColumnInfo>,
    pub results_path: Option<String>,
    pub model_path: Option<String>,
    pub summary_path: Option<String>,
    pub algorithm: Option<String>,
    /// Pretty-printed parameter map, when the task declares one.
    pub parameters: Option<String>,
    pub history: Option<PriorAttempt>,
}

/// Builds a generation request within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, inputs: &PromptInputs) -> String {
        let mut env = Environment::new();
        env.add_template("synthesize", SYNTHESIZE_TEMPLATE)
            .expect("synthesize template should be valid");
        let template = env
            .get_template("synthesize")
            .expect("synthesize template was just added");
        let rendered = template
            .render(context! {
                task_id => inputs.task_id,
                objective => inputs.objective,
                row_count => inputs.row_count,
                input_columns => inputs.input_columns,
                id_columns => inputs.id_columns,
                output_columns => inputs.output_columns,
                results_path => inputs.results_path,
                model_path => inputs.model_path,
                summary_path => inputs.summary_path,
                algorithm => inputs.algorithm,
                parameters => inputs.parameters,
                history => inputs.history,
            })
            .expect("synthesize template rendering should not fail");

        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    use std::sync::LazyLock;
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex is valid")
    });

    let mut sections = Vec::new();
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();

    for (i, caps) in matches.iter().enumerate() {
        let key = caps
            .get(1)
            .expect("marker has a key group")
            .as_str()
            .to_string();
        let required = caps.get(2).expect("marker has a mode group").as_str() == "required";
        let start = caps.get(0).expect("whole match").end();
        let end = matches
            .get(i + 1)
            .map(|m| m.get(0).expect("whole match").start())
            .unwrap_or(rendered.len());

        let content = rendered[start..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key,
                required,
                content,
            });
        }
    }

    sections
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
///
/// Drop order: hints -> history
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in ["hints", "history"] {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // If still over budget, truncate the last section.
    if total_len(sections) > budget && !sections.is_empty() {
        let other_len: usize = sections
            .iter()
            .take(sections.len() - 1)
            .map(|s| s.content.len())
            .sum();
        let allowed = budget.saturating_sub(other_len);
        let last = sections.last_mut().expect("sections is non-empty");
        if last.content.len() > allowed {
            let mut end = allowed.saturating_sub(12).min(last.content.len());
            while !last.content.is_char_boundary(end) {
                end -= 1;
            }
            last.content.truncate(end);
            last.content.push_str("\n[truncated]");
            debug!(section = %last.key, "truncated section for budget");
        }
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
