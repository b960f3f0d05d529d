//! Declarative image extraction rules.

use a3s_airgap_core::error::{AirgapError, Result};
use a3s_airgap_core::resource::{AirgapConfig, CONFIG_API_VERSION, CONFIG_KIND};
use a3s_airgap_core::{ManifestObject, TypeMeta};

use super::path::PathExpr;

/// Pod template paths shared by every controller kind.
const POD_TEMPLATE_PATHS: &[&str] = &[
    "$.spec.template.spec.containers[*].image",
    "$.spec.template.spec.initContainers[*].image",
];

/// Built-in rules: (kind, apiVersion, paths).
const DEFAULT_RULES: &[(&str, &str, &[&str])] = &[
    (
        "Pod",
        "v1",
        &[
            "$.spec.containers[*].image",
            "$.spec.initContainers[*].image",
            "$.spec.ephemeralContainers[*].image",
        ],
    ),
    ("ReplicationController", "v1", POD_TEMPLATE_PATHS),
    ("Deployment", "apps/v1", POD_TEMPLATE_PATHS),
    ("StatefulSet", "apps/v1", POD_TEMPLATE_PATHS),
    ("DaemonSet", "apps/v1", POD_TEMPLATE_PATHS),
    ("ReplicaSet", "apps/v1", POD_TEMPLATE_PATHS),
    ("Job", "batch/v1", POD_TEMPLATE_PATHS),
    (
        "CronJob",
        "batch/v1",
        &[
            "$.spec.jobTemplate.spec.template.spec.containers[*].image",
            "$.spec.jobTemplate.spec.template.spec.initContainers[*].image",
        ],
    ),
    (CONFIG_KIND, CONFIG_API_VERSION, &["$.spec.images[*]"]),
];

/// A compiled rule: objects of exactly this kind and apiVersion yield the
/// values at `paths`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRule {
    type_meta: TypeMeta,
    paths: Vec<PathExpr>,
}

impl ExtractionRule {
    /// Compile a rule. Fails if any path expression is malformed.
    pub fn new<S: AsRef<str>>(type_meta: TypeMeta, paths: &[S]) -> Result<Self> {
        let paths = paths
            .iter()
            .map(|p| {
                PathExpr::parse(p.as_ref()).map_err(|e| AirgapError::RuleError {
                    rule: type_meta.to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { type_meta, paths })
    }

    pub fn type_meta(&self) -> &TypeMeta {
        &self.type_meta
    }

    pub fn paths(&self) -> &[PathExpr] {
        &self.paths
    }

    /// Exact string match on both kind and apiVersion.
    pub fn matches(&self, object: &ManifestObject) -> bool {
        self.type_meta.kind == object.kind() && self.type_meta.api_version == object.api_version()
    }
}

/// Ordered collection of extraction rules.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<ExtractionRule>,
}

impl RuleRegistry {
    /// An empty registry, without the built-in rules.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry seeded with the built-in workload rules.
    pub fn with_defaults() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .map(|(kind, api_version, paths)| ExtractionRule {
                type_meta: TypeMeta::new(*kind, *api_version),
                paths: paths
                    .iter()
                    .map(|p| PathExpr::parse(p).expect("built-in path expressions are valid"))
                    .collect(),
            })
            .collect();

        Self { rules }
    }

    /// Built-in rules plus the rules of every configuration object in `objects`.
    pub fn from_objects(objects: &[ManifestObject]) -> Result<Self> {
        let mut registry = Self::with_defaults();

        for object in objects.iter().filter(|o| AirgapConfig::is_config(o)) {
            tracing::info!(
                name = object.name().unwrap_or("<unnamed>"),
                "Found airgap config"
            );
            let config = AirgapConfig::from_manifest(object)?;
            registry.extend_from_config(&config)?;
        }

        Ok(registry)
    }

    /// Append every rule declared by a configuration object.
    pub fn extend_from_config(&mut self, config: &AirgapConfig) -> Result<()> {
        for spec in &config.spec.rules {
            let rule = ExtractionRule::new(spec.type_meta.clone(), &spec.paths)?;
            tracing::debug!(
                rule = %rule.type_meta(),
                paths = rule.paths().len(),
                "Registered extraction rule from config"
            );
            self.push(rule);
        }
        Ok(())
    }

    /// Append a rule. Existing rules are never replaced.
    pub fn push(&mut self, rule: ExtractionRule) {
        self.rules.push(rule);
    }

    /// Rules matching `object`, in registration order.
    pub fn matching<'a>(
        &'a self,
        object: &'a ManifestObject,
    ) -> impl Iterator<Item = &'a ExtractionRule> + 'a {
        self.rules.iter().filter(move |r| r.matches(object))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtractionRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
