use crate::analyzer::dataset::SimilarContract;
use crate::llm::prompts::{DESCRIBE_GENERAL, DESCRIBE_REENTRANT, DESCRIBE_SAFE};
use crate::llm::session::LLMSession;
use crate::types::Label;
use std::collections::HashMap;
use tracing::{debug, warn};

fn describe_template(label: Option<Label>) -> &'static str {
    match label {
        Some(Label::Reentrant) => DESCRIBE_REENTRANT,
        Some(Label::Safe) => DESCRIBE_SAFE,
        None => DESCRIBE_GENERAL,
    }
}

fn block_header(similar: &SimilarContract) -> String {
    let label = similar
        .label
        .map(|l| l.to_string())
        .unwrap_or_else(|| "Unlabeled".to_string());
    format!("#### Similar contract {} ({})", similar.rank, label)
}

/// Builds the similar-contracts section of a retrieval-augmented prompt.
///
/// With `describe` on, each similar contract is first summarised by the model using
/// the template for its label; a description that cannot be obtained is dropped.
/// Returns `None` when nothing usable is left.
pub async fn assemble_context(
    session: &LLMSession<'_>,
    similar: &[SimilarContract],
    describe: bool,
) -> Option<String> {
    let mut blocks = Vec::with_capacity(similar.len());

    for entry in similar {
        let body = if describe {
            let stage = format!("describe_similar:{}", entry.rank);
            let mut variables = HashMap::new();
            variables.insert("similar_source_code", entry.text.clone());

            match session
                .complete_text(&stage, describe_template(entry.label), &variables)
                .await
            {
                Ok(description) => description,
                Err(e) => {
                    warn!("Dropping similar contract {}: {}", entry.rank, e);
                    continue;
                }
            }
        } else {
            entry.text.clone()
        };

        blocks.push(format!("{}\n{}\n", block_header(entry), body.trim_end()));
    }

    debug!("Assembled {} of {} similar contracts", blocks.len(), similar.len());
    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n"))
    }
}
