//! Validation errors for manifest documents.

use thiserror::Error;

use fabricsync_core::ResourceKind;

/// Why a single manifest document was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("document is not valid YAML: {0}")]
    Yaml(String),

    #[error("document is not a mapping")]
    NotAMapping,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown kind '{0}'")]
    UnknownKind(String),

    #[error("kind {kind} expects apiVersion {expected}, found '{found}'")]
    ApiVersion {
        kind: ResourceKind,
        expected: String,
        found: String,
    },

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("{kind} spec does not match schema: {message}")]
    Schema { kind: ResourceKind, message: String },

    #[error("{kind} '{name}': {message}")]
    Spec {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    #[error("expected exactly one document, found {0}")]
    DocumentCount(usize),
}

/// A rejected document inside a (possibly multi-document) file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("document #{index}{}: {error}", name.as_deref().map(|n| format!(" ({n})")).unwrap_or_default())]
pub struct DocumentError {
    /// Zero-based position of the document in its file.
    pub index: usize,
    /// `metadata.name`, when it could be read.
    pub name: Option<String>,
    pub error: ValidationError,
}
