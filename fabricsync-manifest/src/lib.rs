//! # fabricsync-manifest
//!
//! Manifest documents for fabric resources: multi-document splitting,
//! per-kind typed specs with validation, canonical form, content hashing and
//! provenance annotations.
//!
//! Call [`parse_documents`] on a raw file to get one result per document, or
//! [`parse_managed`] on a managed file to get its resource and provenance.

pub mod canonical;
pub mod document;
pub mod error;
pub mod resource;
pub mod spec;

pub use canonical::{content_hash, hash_bytes, hash_text, Provenance};
pub use document::{parse_documents, parse_managed, split_documents};
pub use error::{DocumentError, ValidationError};
pub use resource::{ObjectMeta, Resource, DEFAULT_NAMESPACE};
pub use spec::ResourceSpec;
