//! Loosely-typed manifest objects.
//!
//! Manifests are kept as generic `serde_json::Value` trees so that any kind
//! can be queried without compile-time knowledge of its schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AirgapError, Result};

/// The (kind, apiVersion) pair identifying a manifest's schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeMeta {
    #[serde(default)]
    pub kind: String,
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
}

impl TypeMeta {
    pub fn new(kind: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            api_version: api_version.into(),
        }
    }
}

impl std::fmt::Display for TypeMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.api_version)
    }
}

/// A single decoded manifest document.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestObject {
    type_meta: TypeMeta,
    root: Value,
}

impl ManifestObject {
    /// Wrap a decoded document. The top level must be a map.
    pub fn from_value(root: Value) -> Result<Self> {
        let map = root.as_object().ok_or_else(|| {
            AirgapError::SerializationError(format!(
                "manifest document must be a map, got {}",
                value_type_name(&root)
            ))
        })?;

        let field = |name: &str| {
            map.get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(Self {
            type_meta: TypeMeta {
                kind: field("kind"),
                api_version: field("apiVersion"),
            },
            root,
        })
    }

    pub fn type_meta(&self) -> &TypeMeta {
        &self.type_meta
    }

    pub fn kind(&self) -> &str {
        &self.type_meta.kind
    }

    pub fn api_version(&self) -> &str {
        &self.type_meta.api_version
    }

    /// `metadata.name`, if present.
    pub fn name(&self) -> Option<&str> {
        self.root.get("metadata")?.get("name")?.as_str()
    }

    /// The full document tree.
    pub fn root(&self) -> &Value {
        &self.root
    }
}

impl std::fmt::Display for ManifestObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} ({})",
            self.kind(),
            self.name().unwrap_or("<unnamed>"),
            self.api_version()
        )
    }
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}
