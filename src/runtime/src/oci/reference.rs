//! Image reference parsing.
//!
//! Parses references like `ghcr.io/org/app:v1.2` into registry, repository
//! and a tag-or-digest selector, applying Docker Hub defaults.

use a3s_airgap_core::error::{AirgapError, Result};

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither tag nor digest is given.
pub const DEFAULT_TAG: &str = "latest";

const MAX_NAME_LENGTH: usize = 255;
const MAX_TAG_LENGTH: usize = 128;

/// Which manifest of a repository a reference points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Tag(String),
    Digest(String),
}

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, with optional port (e.g. "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g. "library/nginx", "org/app")
    pub repository: String,
    pub selector: Selector,
    original: String,
}

impl ImageReference {
    /// Parse `[host[:port]/]path[:tag][@algorithm:hex]`.
    ///
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `myuser/app:1.0` → docker.io/myuser/app:1.0
    /// - `ghcr.io/org/app@sha256:…` → ghcr.io/org/app@sha256:…
    /// - `ghcr.io/org/app:v1@sha256:…` → the digest wins, the tag is dropped
    pub fn parse(reference: &str) -> Result<Self> {
        let original = reference;
        let reference = reference.trim();
        let invalid = |message: String| AirgapError::ReferenceError {
            reference: original.to_string(),
            message,
        };

        if reference.is_empty() {
            return Err(invalid("empty reference".to_string()));
        }

        let (name_tag, digest) = match reference.split_once('@') {
            Some((name_tag, digest)) => {
                validate_digest(digest).map_err(invalid)?;
                (name_tag, Some(digest))
            }
            None => (reference, None),
        };

        // A tag colon can only follow the last slash; earlier colons belong
        // to a registry port.
        let last_slash = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let colon = last_slash + colon;
                (&name_tag[..colon], Some(&name_tag[colon + 1..]))
            }
            None => (name_tag, None),
        };

        if let Some(tag) = tag {
            validate_tag(tag).map_err(invalid)?;
        }

        let (registry, repository) = split_registry_repository(name).map_err(invalid)?;

        let full_name_len = registry.len() + 1 + repository.len();
        if full_name_len > MAX_NAME_LENGTH {
            return Err(invalid(format!(
                "name exceeds {} characters",
                MAX_NAME_LENGTH
            )));
        }

        let selector = match (digest, tag) {
            (Some(digest), _) => Selector::Digest(digest.to_string()),
            (None, Some(tag)) => Selector::Tag(tag.to_string()),
            (None, None) => Selector::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(ImageReference {
            registry,
            repository,
            selector,
            original: original.to_string(),
        })
    }

    /// The string this reference was parsed from.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.selector {
            Selector::Tag(tag) => Some(tag),
            Selector::Digest(_) => None,
        }
    }

    pub fn digest(&self) -> Option<&str> {
        match &self.selector {
            Selector::Digest(digest) => Some(digest),
            Selector::Tag(_) => None,
        }
    }

    /// Canonical form: `registry/repository:tag` or `registry/repository@digest`.
    pub fn full_reference(&self) -> String {
        match &self.selector {
            Selector::Tag(tag) => format!("{}/{}:{}", self.registry, self.repository, tag),
            Selector::Digest(digest) => {
                format!("{}/{}@{}", self.registry, self.repository, digest)
            }
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split a name into registry and repository, applying Docker Hub defaults.
fn split_registry_repository(name: &str) -> std::result::Result<(String, String), String> {
    let (registry, path) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            validate_host(first)?;
            let registry = match first {
                "index.docker.io" | "registry-1.docker.io" => DEFAULT_REGISTRY,
                other => other,
            };
            (registry.to_string(), rest)
        }
        _ => (DEFAULT_REGISTRY.to_string(), name),
    };

    if path.is_empty() {
        return Err("empty repository".to_string());
    }

    for component in path.split('/') {
        if !is_valid_path_component(component) {
            return Err(format!(
                "invalid repository component '{}': must be lowercase alphanumerics separated by '.', '_', '__' or '-'",
                component
            ));
        }
    }

    let repository = if registry == DEFAULT_REGISTRY && !path.contains('/') {
        format!("library/{}", path)
    } else {
        path.to_string()
    };

    Ok((registry, repository))
}

fn validate_host(host: &str) -> std::result::Result<(), String> {
    let (hostname, port) = match host.split_once(':') {
        Some((hostname, port)) => (hostname, Some(port)),
        None => (host, None),
    };

    let label_ok = |label: &str| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if !hostname.split('.').all(label_ok) {
        return Err(format!("invalid registry host '{}'", host));
    }

    if let Some(port) = port {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("invalid registry port in '{}'", host));
        }
    }

    Ok(())
}

fn is_valid_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last)) if is_alnum(first) && is_alnum(last) => {}
        _ => return false,
    }

    let mut i = 0;
    while i < bytes.len() {
        if is_alnum(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !is_alnum(bytes[i]) {
            i += 1;
        }
        let separator = &component[start..i];
        let ok = matches!(separator, "." | "_" | "__") || separator.bytes().all(|b| b == b'-');
        if !ok {
            return false;
        }
    }

    true
}

fn validate_tag(tag: &str) -> std::result::Result<(), String> {
    let mut chars = tag.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric() || c == '_')
        .unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if !first_ok || !rest_ok || tag.len() > MAX_TAG_LENGTH {
        return Err(format!("invalid tag '{}'", tag));
    }
    Ok(())
}

fn validate_digest(digest: &str) -> std::result::Result<(), String> {
    let (algorithm, hex) = digest
        .split_once(':')
        .ok_or_else(|| format!("invalid digest '{}': expected algorithm:hex", digest))?;

    let algorithm_ok = !algorithm.is_empty()
        && algorithm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '_' | '-'));
    if !algorithm_ok {
        return Err(format!("invalid digest algorithm '{}'", algorithm));
    }

    let hex_ok = hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    let length_ok = if algorithm == "sha256" {
        hex.len() == 64
    } else {
        hex.len() >= 32
    };
    if !hex_ok || !length_ok {
        return Err(format!("invalid {} digest '{}'", algorithm, hex));
    }

    Ok(())
}
