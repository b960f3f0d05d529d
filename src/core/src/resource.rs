//! The tool's own self-describing configuration kind.
//!
//! A `Config` document placed alongside ordinary manifests can add
//! extraction rules and list extra images to include verbatim:
//!
//! ```yaml
//! apiVersion: airgap.a3s-lab.dev/v1alpha1
//! kind: Config
//! spec:
//!   rules:
//!     - apiVersion: ceph.rook.io/v1
//!       kind: CephCluster
//!       paths:
//!         - $.spec.cephVersion.image
//!   images:
//!     - quay.io/ceph/ceph:v18
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{AirgapError, Result};
use crate::manifest::{ManifestObject, TypeMeta};

/// API version of the configuration kind.
pub const CONFIG_API_VERSION: &str = "airgap.a3s-lab.dev/v1alpha1";

/// Kind name of the configuration kind.
pub const CONFIG_KIND: &str = "Config";

/// A user-supplied extraction rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRuleSpec {
    /// Kind and apiVersion of the objects the rule applies to
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    /// Path expressions yielding image references
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSpec {
    /// Custom image extraction rules to apply to the manifests
    #[serde(default)]
    pub rules: Vec<ConfigRuleSpec>,
    /// Additional images to include in the archive, e.g. those created
    /// at runtime by operators and never named in a manifest
    #[serde(default)]
    pub images: Vec<String>,
}

/// Typed view of a `Config` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirgapConfig {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub spec: ConfigSpec,
}

impl AirgapConfig {
    /// Whether the object is of the configuration kind.
    pub fn is_config(object: &ManifestObject) -> bool {
        object.kind() == CONFIG_KIND && object.api_version() == CONFIG_API_VERSION
    }

    /// Convert a manifest object of the configuration kind.
    pub fn from_manifest(object: &ManifestObject) -> Result<Self> {
        if !Self::is_config(object) {
            return Err(AirgapError::ConfigError(format!(
                "expected {} {}, got {}",
                CONFIG_KIND,
                CONFIG_API_VERSION,
                object.type_meta()
            )));
        }

        serde_json::from_value(object.root().clone()).map_err(|e| {
            AirgapError::ConfigError(format!(
                "failed to convert config {}: {}",
                object.name().unwrap_or("<unnamed>"),
                e
            ))
        })
    }
}
