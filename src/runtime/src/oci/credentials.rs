//! Registry credential resolution.
//!
//! Credentials are looked up per registry in the Docker client config
//! (`$DOCKER_CONFIG/config.json`, else `~/.docker/config.json`), then in the
//! `REGISTRY_USERNAME` / `REGISTRY_PASSWORD` environment variables. Anything
//! else is anonymous.
//!
//! Within the Docker config, a credential helper (`credHelpers` for the
//! registry, else `credsStore`) is asked first; `auths` is the fallback.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use a3s_airgap_core::error::{AirgapError, Result};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use serde::Deserialize;

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// No credentials.
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if either is unset.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    /// Credentials for `registry` from the ambient Docker config, then the
    /// environment, then anonymous.
    pub fn resolve(registry: &str) -> Self {
        Self::resolve_from(DockerCredentials::default_location().as_ref(), registry)
    }

    /// Like [`resolve`](Self::resolve) with an explicit credential source.
    pub fn resolve_from(store: Option<&DockerCredentials>, registry: &str) -> Self {
        if let Some(store) = store {
            match store.get(registry) {
                Ok(Some((username, password))) => {
                    tracing::debug!(registry, path = %store.path().display(), "Using credentials from Docker config");
                    return Self::basic(username, password);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(registry, error = %e, "Ignoring unreadable Docker config"),
            }
        }

        Self::from_env()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
    #[serde(default)]
    creds_store: Option<String>,
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

impl DockerConfigFile {
    /// Helper name for a normalized registry host.
    fn helper_for(&self, registry: &str) -> Option<&str> {
        self.cred_helpers
            .iter()
            .find(|(key, _)| normalize_registry(key) == registry)
            .map(|(_, helper)| helper.as_str())
            .or(self.creds_store.as_deref())
            .filter(|helper| !helper.is_empty())
    }
}

/// Reply of `docker-credential-<helper> get`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperCredentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    secret: String,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Read-only view of a Docker client `config.json`.
#[derive(Debug, Clone)]
pub struct DockerCredentials {
    path: PathBuf,
    helper_dir: Option<PathBuf>,
}

impl DockerCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            helper_dir: None,
        }
    }

    /// Look for `docker-credential-*` programs in `dir` instead of `PATH`.
    pub fn with_helper_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.helper_dir = Some(dir.into());
        self
    }

    /// `$DOCKER_CONFIG/config.json`, else `~/.docker/config.json`.
    pub fn default_location() -> Option<Self> {
        let dir = match std::env::var_os("DOCKER_CONFIG") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()?.join(".docker"),
        };
        Some(Self::new(dir.join("config.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `(username, password)` for `registry`, if configured.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;
        let wanted = normalize_registry(registry);

        if let Some(helper) = file.helper_for(&wanted) {
            match self.run_helper(helper, &wanted) {
                Ok(Some(credentials)) => return Ok(Some(credentials)),
                Ok(None) => tracing::debug!(registry, helper, "Credential helper has no entry"),
                Err(e) => tracing::warn!(registry, helper, error = %e, "Credential helper failed"),
            }
        }

        let entry = file
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry);

        match entry {
            Some(entry) => self.decode_entry(registry, entry),
            None => Ok(None),
        }
    }

    fn decode_entry(&self, registry: &str, entry: &DockerAuthEntry) -> Result<Option<(String, String)>> {
        if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
            use base64::Engine;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(auth)
                .map_err(|e| {
                    AirgapError::ConfigError(format!(
                        "Invalid auth for {} in {}: {}",
                        registry,
                        self.path.display(),
                        e
                    ))
                })?;
            let decoded = String::from_utf8(decoded).map_err(|e| {
                AirgapError::ConfigError(format!(
                    "Invalid auth for {} in {}: {}",
                    registry,
                    self.path.display(),
                    e
                ))
            })?;
            return match decoded.split_once(':') {
                Some((username, password)) => Ok(Some((username.to_string(), password.to_string()))),
                None => Err(AirgapError::ConfigError(format!(
                    "Invalid auth for {} in {}: expected username:password",
                    registry,
                    self.path.display()
                ))),
            };
        }

        match (&entry.username, &entry.password) {
            (Some(u), Some(p)) => Ok(Some((u.clone(), p.clone()))),
            _ => Ok(None),
        }
    }

    /// Run the `get` verb of a Docker credential helper.
    ///
    /// `Ok(None)` when the helper reports no stored credentials.
    fn run_helper(&self, helper: &str, registry: &str) -> Result<Option<(String, String)>> {
        let program = format!("docker-credential-{}", helper);
        let program = match self.helper_dir {
            Some(ref dir) => dir.join(program),
            None => PathBuf::from(program),
        };
        let helper_error = |message: String| {
            AirgapError::ConfigError(format!("{} get: {}", program.display(), message))
        };

        let mut child = Command::new(&program)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| helper_error(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(helper_server_url(registry).as_bytes())
                .map_err(|e| helper_error(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| helper_error(e.to_string()))?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.contains("credentials not found") {
                return Ok(None);
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stdout.trim().is_empty() { stderr.trim() } else { stdout.trim() };
            return Err(helper_error(format!("{} ({})", detail, output.status)));
        }

        let credentials: HelperCredentials =
            serde_json::from_slice(&output.stdout).map_err(|e| helper_error(e.to_string()))?;
        if credentials.username.is_empty() && credentials.secret.is_empty() {
            return Ok(None);
        }

        tracing::debug!(registry, helper, "Using credentials from credential helper");
        Ok(Some((credentials.username, credentials.secret)))
    }

    /// Missing file reads as empty.
    fn load(&self) -> Result<DockerConfigFile> {
        if !self.path.exists() {
            return Ok(DockerConfigFile::default());
        }

        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            AirgapError::ConfigError(format!(
                "Failed to read Docker config {}: {}",
                self.path.display(),
                e
            ))
        })?;

        serde_json::from_str(&data).map_err(|e| {
            AirgapError::ConfigError(format!(
                "Failed to parse Docker config {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Reduce an `auths` key or registry host to a comparable form.
///
/// Strips any scheme and path (`https://index.docker.io/v1/` → `index.docker.io`)
/// and folds the Docker Hub aliases into `docker.io`.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r);
    let host = r.split('/').next().unwrap_or_default();

    match host {
        "index.docker.io" | "registry-1.docker.io" => "docker.io".to_string(),
        other => other.to_string(),
    }
}

/// Server URL a credential helper stores `registry` under.
fn helper_server_url(registry: &str) -> String {
    match registry {
        "docker.io" => "https://index.docker.io/v1/".to_string(),
        other => other.to_string(),
    }
}
