//! JSON Lines connector for pre-converted pages.
//!
//! Each non-blank line is `{"id": "...", "text": "...", "metadata": {...}}`
//! with `metadata` optional and limited to string or number values.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use change_indexer_core::models::{Item, Metadata};

use crate::config::Config;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonlRecord {
    id: String,
    text: String,
    #[serde(default)]
    metadata: Metadata,
}

pub fn parse_jsonl(content: &str) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: JsonlRecord = serde_json::from_str(line)
            .with_context(|| format!("Malformed JSONL record on line {}", idx + 1))?;
        items.push(Item {
            id: record.id,
            canonical_text: record.text,
            metadata: record.metadata,
        });
    }
    Ok(items)
}

pub fn scan_jsonl(config: &Config, input: Option<&Path>) -> Result<Vec<Item>> {
    let path = input
        .map(Path::to_path_buf)
        .or_else(|| config.connectors.jsonl.as_ref().and_then(|c| c.path.clone()))
        .ok_or_else(|| {
            anyhow::anyhow!("No JSONL input given: pass --input or set connectors.jsonl.path")
        })?;

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read JSONL file: {}", path.display()))?;
    parse_jsonl(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use change_indexer_core::models::MetadataValue;

    #[test]
    fn parses_records_and_skips_blank_lines() {
        let content = r#"{"id": "page-1", "text": "Onboarding guide", "metadata": {"space": "ENG", "version": 3}}

{"id": "page-2", "text": "Release process"}
"#;
        let items = parse_jsonl(content).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].metadata["space"], MetadataValue::Text("ENG".into()));
        assert_eq!(items[0].metadata["version"], MetadataValue::Number(3.0));
        assert!(items[1].metadata.is_empty());
    }

    #[test]
    fn malformed_line_names_line_number() {
        let content = "{\"id\": \"a\", \"text\": \"x\"}\n{\"id\": \"b\"}\n";
        let err = parse_jsonl(content).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{}", err);
    }
}
