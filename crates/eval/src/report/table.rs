use super::ReviewEntry;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Annotation questions a reviewer answers for each row.
pub const QUESTIONS: [&str; 5] = [
    "Correctness BASELINE",
    "Correctness XRAG",
    "Informativeness",
    "Clarity",
    "Additional comments",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Markdown,
    Json,
}

impl TableFormat {
    /// `.json` selects JSON; anything else renders Markdown.
    pub fn from_extension(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Markdown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRow {
    pub contract: String,
    pub model: String,
    pub data_representation: String,
    pub groundtruth: String,
    pub source_code: String,
    pub baseline_explanation: String,
    pub xrag_explanation: String,
    /// One empty answer per entry in [`QUESTIONS`].
    pub answers: Vec<String>,
}

impl From<&ReviewEntry> for ReviewRow {
    fn from(entry: &ReviewEntry) -> Self {
        Self {
            contract: entry.contract_id.clone(),
            model: entry.model.clone(),
            data_representation: entry.data_representation.clone(),
            groundtruth: entry.groundtruth.to_string(),
            source_code: entry.source_code.clone(),
            baseline_explanation: entry.baseline_explanation.clone(),
            xrag_explanation: entry.comparison_explanation.clone(),
            answers: vec![String::new(); QUESTIONS.len()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewTable {
    pub rows: Vec<ReviewRow>,
}

impl ReviewTable {
    pub fn from_entries(entries: &[ReviewEntry]) -> Self {
        Self {
            rows: entries.iter().map(ReviewRow::from).collect(),
        }
    }

    pub fn render(&self, format: TableFormat) -> Result<String> {
        match format {
            TableFormat::Markdown => Ok(self.render_markdown()),
            TableFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| anyhow::anyhow!("Failed to serialize review table: {}", e)),
        }
    }

    fn render_markdown(&self) -> String {
        let mut table = String::new();

        table.push_str("# Misclassification Review\n\n");
        table.push_str(&format!("**Contracts**: {}\n\n", self.rows.len()));

        table.push_str("| Contract | Model | Representation | Ground truth | Source | Baseline | XRAG |");
        for question in QUESTIONS {
            table.push_str(&format!(" {} |", question));
        }
        table.push('\n');
        table.push_str(&"|---".repeat(7 + QUESTIONS.len()));
        table.push_str("|\n");

        for row in &self.rows {
            table.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} |",
                cell(&row.contract),
                cell(&row.model),
                cell(&row.data_representation),
                cell(&row.groundtruth),
                code_cell(&row.source_code),
                cell(&row.baseline_explanation),
                cell(&row.xrag_explanation),
            ));
            for answer in &row.answers {
                table.push_str(&format!(" {} |", cell(answer)));
            }
            table.push('\n');
        }

        table
    }
}

/// Markdown table cells cannot hold raw newlines or pipes.
fn cell(text: &str) -> String {
    text.trim().replace('|', "\\|").replace("\r\n", "<br>").replace('\n', "<br>")
}

fn code_cell(source: &str) -> String {
    if source.trim().is_empty() {
        String::new()
    } else {
        format!("<pre>{}</pre>", cell(&source.replace('<', "&lt;")))
    }
}
