//! A validated manifest resource.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use fabricsync_core::{ResourceKey, ResourceKind};

use crate::canonical::{self, is_provenance_key, Provenance};
use crate::error::ValidationError;
use crate::spec::ResourceSpec;

pub const DEFAULT_NAMESPACE: &str = "default";
const MAX_NAME_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    /// User annotations; provenance keys are stripped on parse.
    pub annotations: BTreeMap<String, String>,
}

/// A manifest document that passed schema and semantic validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub metadata: ObjectMeta,
    pub spec: ResourceSpec,
    /// `spec` normalised through its typed form.
    spec_value: Value,
}

impl Resource {
    /// Build from typed parts, validating name and spec.
    pub fn new(metadata: ObjectMeta, spec: ResourceSpec) -> Result<Self, ValidationError> {
        validate_name(&metadata.name)?;
        validate_name(&metadata.namespace)?;
        let kind = spec.kind();
        let spec_value = spec.to_value().map_err(|e| ValidationError::Schema {
            kind,
            message: e.to_string(),
        })?;
        spec.validate().map_err(|message| ValidationError::Spec {
            kind,
            name: metadata.name.clone(),
            message,
        })?;
        Ok(Self {
            metadata,
            spec,
            spec_value,
        })
    }

    /// Parse and validate one document already decoded to JSON.
    ///
    /// Returns the resource plus provenance if the document carries ours.
    pub fn from_value(value: Value) -> Result<(Self, Option<Provenance>), ValidationError> {
        let Value::Object(mut doc) = value else {
            return Err(ValidationError::NotAMapping);
        };

        let kind_str = take_str(&mut doc, "kind")?;
        let kind: ResourceKind = kind_str
            .parse()
            .map_err(|_| ValidationError::UnknownKind(kind_str.clone()))?;

        let api_version = take_str(&mut doc, "apiVersion")?;
        if api_version != kind.api_version() {
            return Err(ValidationError::ApiVersion {
                kind,
                expected: kind.api_version(),
                found: api_version,
            });
        }

        let Some(Value::Object(mut meta)) = doc.remove("metadata") else {
            return Err(ValidationError::MissingField("metadata"));
        };
        let name = take_str(&mut meta, "name")?;
        let namespace = match meta.remove("namespace") {
            Some(Value::String(ns)) => ns,
            _ => DEFAULT_NAMESPACE.to_string(),
        };
        let labels = string_map(meta.remove("labels"));
        let mut annotations = string_map(meta.remove("annotations"));
        let provenance = Provenance::from_annotations(&annotations);
        annotations.retain(|k, _| !is_provenance_key(k));

        let spec_raw = doc.remove("spec").unwrap_or_else(|| json!({}));
        let spec = ResourceSpec::from_value(kind, spec_raw).map_err(|e| {
            ValidationError::Schema {
                kind,
                message: e.to_string(),
            }
        })?;

        let resource = Self::new(
            ObjectMeta {
                name,
                namespace,
                labels,
                annotations,
            },
            spec,
        )?;
        Ok((resource, provenance))
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind(), &self.metadata.namespace, &self.metadata.name)
    }

    pub fn references(&self) -> Vec<ResourceKey> {
        let own = self.key();
        self.spec
            .references(&self.metadata.namespace)
            .into_iter()
            .filter(|r| r != &own)
            .collect()
    }

    pub fn spec_value(&self) -> &Value {
        &self.spec_value
    }

    /// The document without provenance annotations.
    pub fn canonical_value(&self) -> Value {
        self.document(&self.metadata.annotations)
    }

    pub fn content_hash(&self) -> String {
        canonical::content_hash(&self.canonical_value())
    }

    /// Canonical YAML without provenance; used for diffs and record content.
    pub fn to_canonical_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.canonical_value())
    }

    /// The managed-file form: canonical document plus provenance annotations.
    pub fn render_managed(&self, provenance: &Provenance) -> Result<String, serde_yaml::Error> {
        let mut annotations = self.metadata.annotations.clone();
        annotations.extend(provenance.annotations());
        serde_yaml::to_string(&self.document(&annotations))
    }

    fn document(&self, annotations: &BTreeMap<String, String>) -> Value {
        let mut meta = Map::new();
        meta.insert("name".into(), Value::String(self.metadata.name.clone()));
        meta.insert(
            "namespace".into(),
            Value::String(self.metadata.namespace.clone()),
        );
        if !self.metadata.labels.is_empty() {
            meta.insert("labels".into(), to_object(&self.metadata.labels));
        }
        if !annotations.is_empty() {
            meta.insert("annotations".into(), to_object(annotations));
        }
        json!({
            "apiVersion": self.kind().api_version(),
            "kind": self.kind().as_str(),
            "metadata": Value::Object(meta),
            "spec": self.spec_value.clone(),
        })
    }
}

fn take_str(map: &mut Map<String, Value>, field: &'static str) -> Result<String, ValidationError> {
    match map.remove(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn string_map(value: Option<Value>) -> BTreeMap<String, String> {
    let Some(Value::Object(map)) = value else {
        return BTreeMap::new();
    };
    map.into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect()
}

fn to_object(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// DNS-1123 subdomain rules; also guarantees the name is a safe file stem.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let invalid = |reason| ValidationError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("longer than 253 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(invalid("only lowercase alphanumerics, '-' and '.' are allowed"));
    }
    let first = name.chars().next();
    let last = name.chars().last();
    let alnum = |c: Option<char>| c.map(|c| c.is_ascii_alphanumeric()).unwrap_or(false);
    if !alnum(first) || !alnum(last) {
        return Err(invalid("must start and end with an alphanumeric character"));
    }
    if name.contains("..") {
        return Err(invalid("must not contain '..'"));
    }
    Ok(())
}
