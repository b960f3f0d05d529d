//! OCI registry client for fetching images into a blob store.
//!
//! Uses the `oci-distribution` crate to talk to container registries
//! (Docker Hub, GHCR, etc.).

use std::collections::HashMap;

use a3s_airgap_core::error::{AirgapError, Result};
use a3s_airgap_core::Platform;
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{
    ImageIndexEntry, IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
};
use oci_distribution::{Client, Reference};
use parking_lot::Mutex;

use super::credentials::RegistryAuth;
use super::layout::{BlobStore, Descriptor, FetchedImage};
use super::reference::{ImageReference, Selector};

/// Fetches one image's manifest and blobs into a [`BlobStore`].
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, reference: &ImageReference, blobs: &BlobStore) -> Result<FetchedImage>;
}

/// Pulls images from container registries.
pub struct RegistryPuller {
    client: Client,
    auth: Option<RegistryAuth>,
    resolved_auth: Mutex<HashMap<String, RegistryAuth>>,
}

impl RegistryPuller {
    /// Credentials are resolved per registry from the ambient Docker config
    /// and environment. Multi-arch images resolve to `platform`, or to
    /// linux on the host architecture when `None`.
    pub fn new(platform: Option<Platform>) -> Self {
        let platform = platform.unwrap_or_else(Platform::host_linux);
        tracing::debug!(platform = %platform, "Creating registry client");

        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(move |entries: &[ImageIndexEntry]| {
                platform_resolver(entries, &platform)
            })),
            ..Default::default()
        };

        Self {
            client: Client::new(config),
            auth: None,
            resolved_auth: Mutex::new(HashMap::new()),
        }
    }

    /// Use `auth` for every registry instead of resolving credentials.
    pub fn with_auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Resolution may read files and run credential helpers, so it happens on
    /// the blocking pool and is cached per registry.
    async fn auth_for(&self, registry: &str) -> RegistryAuth {
        if let Some(ref auth) = self.auth {
            return auth.clone();
        }
        let cached = self.resolved_auth.lock().get(registry).cloned();
        if let Some(auth) = cached {
            return auth;
        }

        let host = registry.to_string();
        let auth = match tokio::task::spawn_blocking(move || RegistryAuth::resolve(&host)).await {
            Ok(auth) => auth,
            Err(e) => {
                tracing::warn!(registry, error = %e, "Credential lookup failed; pulling anonymously");
                RegistryAuth::anonymous()
            }
        };

        self.resolved_auth
            .lock()
            .entry(registry.to_string())
            .or_insert(auth)
            .clone()
    }
}

#[async_trait]
impl ImageFetcher for RegistryPuller {
    async fn fetch(&self, reference: &ImageReference, blobs: &BlobStore) -> Result<FetchedImage> {
        let oci_ref = to_oci_reference(reference);
        let auth = self.auth_for(&reference.registry).await.to_oci_auth();
        let registry_error = |message: String| AirgapError::RegistryError {
            reference: reference.original().to_string(),
            message,
        };

        tracing::debug!(reference = %reference, "Pulling image manifest");

        // Resolves multi-arch indexes through the platform resolver
        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| registry_error(format!("Failed to pull manifest: {}", e)))?;

        // Raw bytes, so the stored blob hashes to the digest the registry reported
        let (manifest_bytes, _) = self
            .client
            .pull_manifest_raw(
                &Reference::with_digest(
                    oci_ref.registry().to_string(),
                    oci_ref.repository().to_string(),
                    manifest_digest.clone(),
                ),
                &auth,
                &[OCI_IMAGE_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE],
            )
            .await
            .map_err(|e| registry_error(format!("Failed to pull manifest {}: {}", manifest_digest, e)))?;

        let manifest_size = manifest_bytes.len() as u64;
        blobs
            .store(&manifest_digest, manifest_bytes.to_vec())
            .await
            .map_err(|e| registry_error(format!("Failed to store manifest: {}", e)))?;

        let descriptors = std::iter::once(&manifest.config).chain(manifest.layers.iter());
        let mut blob_digests = Vec::new();

        for descriptor in descriptors {
            blob_digests.push(descriptor.digest.clone());

            if blobs.contains(&descriptor.digest) {
                tracing::debug!(digest = %descriptor.digest, "Blob already present");
                continue;
            }

            tracing::debug!(
                digest = %descriptor.digest,
                size = descriptor.size,
                "Pulling blob"
            );

            let mut writer = blobs
                .writer(&descriptor.digest)
                .await
                .map_err(|e| registry_error(e.to_string()))?;
            self.client
                .pull_blob(&oci_ref, descriptor, &mut writer)
                .await
                .map_err(|e| registry_error(format!("Failed to pull blob {}: {}", descriptor.digest, e)))?;
            writer
                .commit()
                .await
                .map_err(|e| registry_error(e.to_string()))?;
        }

        let media_type = manifest
            .media_type
            .clone()
            .unwrap_or_else(|| OCI_IMAGE_MEDIA_TYPE.to_string());

        tracing::debug!(
            reference = %reference,
            digest = %manifest_digest,
            blobs = blob_digests.len(),
            "Image fetched"
        );

        Ok(FetchedImage {
            manifest: Descriptor {
                media_type,
                digest: manifest_digest,
                size: manifest_size,
            },
            blobs: blob_digests,
        })
    }
}

/// Convert an [`ImageReference`] into an oci-distribution [`Reference`].
pub fn to_oci_reference(reference: &ImageReference) -> Reference {
    match &reference.selector {
        Selector::Tag(tag) => Reference::with_tag(
            reference.registry.clone(),
            reference.repository.clone(),
            tag.clone(),
        ),
        Selector::Digest(digest) => Reference::with_digest(
            reference.registry.clone(),
            reference.repository.clone(),
            digest.clone(),
        ),
    }
}

/// Pick the index entry matching `platform`.
///
/// A requested variant must match exactly; without one, the first entry for
/// the os/architecture wins.
fn platform_resolver(entries: &[ImageIndexEntry], platform: &Platform) -> Option<String> {
    entries
        .iter()
        .find(|entry| {
            entry.platform.as_ref().map_or(false, |p| {
                p.os == platform.os
                    && p.architecture == platform.architecture
                    && (platform.variant.is_none() || p.variant == platform.variant)
            })
        })
        .map(|entry| entry.digest.clone())
}
