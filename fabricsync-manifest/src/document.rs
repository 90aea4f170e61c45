//! Multi-document splitting.
//!
//! Documents are split on `---` lines before any YAML parsing so that a
//! syntax error in one document cannot take down its neighbours.

use serde_json::Value;

use crate::canonical::Provenance;
use crate::error::{DocumentError, ValidationError};
use crate::resource::Resource;

/// Split YAML text into its document bodies, dropping empty documents.
pub fn split_documents(text: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();

    for line in text.replace("\r\n", "\n").lines() {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- ") {
            push_doc(&mut docs, std::mem::take(&mut current));
            if let Some(rest) = trimmed.strip_prefix("--- ") {
                current.push_str(rest);
                current.push('\n');
            }
            continue;
        }
        if trimmed == "..." {
            push_doc(&mut docs, std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    push_doc(&mut docs, current);
    docs
}

fn push_doc(docs: &mut Vec<String>, body: String) {
    let has_content = body.lines().any(|l| {
        let t = l.trim();
        !t.is_empty() && !t.starts_with('#')
    });
    if has_content {
        docs.push(body);
    }
}

/// Parse and validate every document in `text` independently.
///
/// The result has one entry per non-empty document, in file order.
pub fn parse_documents(text: &str) -> Vec<Result<Resource, DocumentError>> {
    split_documents(text)
        .iter()
        .enumerate()
        .map(|(index, body)| {
            let value: Value = serde_yaml::from_str(body).map_err(|e| DocumentError {
                index,
                name: None,
                error: ValidationError::Yaml(e.to_string()),
            })?;
            let name = value
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Resource::from_value(value)
                .map(|(resource, _)| resource)
                .map_err(|error| DocumentError { index, name, error })
        })
        .collect()
}

/// Parse a managed file: exactly one document, provenance if present.
pub fn parse_managed(text: &str) -> Result<(Resource, Option<Provenance>), ValidationError> {
    let docs = split_documents(text);
    if docs.len() != 1 {
        return Err(ValidationError::DocumentCount(docs.len()));
    }
    let value: Value =
        serde_yaml::from_str(&docs[0]).map_err(|e| ValidationError::Yaml(e.to_string()))?;
    Resource::from_value(value)
}
