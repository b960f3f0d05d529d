//! OCI image layout assembly.
//!
//! A layout directory contains:
//! - `oci-layout`
//! - `index.json`
//! - `blobs/sha256/<hex>`
//!
//! Blobs are shared between images; `index.json` holds one entry per
//! distinct reference string.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use a3s_airgap_core::error::{AirgapError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::reference::ImageReference;

/// Contents of the `oci-layout` marker file.
pub const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Annotation holding the reference string as written in the manifests.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Annotation holding the fully qualified reference (read by containerd).
pub const ANNOTATION_IMAGE_NAME: &str = "io.containerd.image.name";

/// Media type, digest and size of a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

/// An image whose manifest and blobs have been written to a [`BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub manifest: Descriptor,
    /// Config and layer digests referenced by the manifest.
    pub blobs: Vec<String>,
}

/// One `index.json` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    /// Reference string as extracted from the manifests.
    pub reference: String,
    /// Canonical form of `reference`.
    pub canonical: String,
    pub manifest: Descriptor,
    pub blobs: BTreeSet<String>,
}

/// Content-addressed blob directory (`blobs/`).
///
/// Safe for concurrent writers: blobs are written to a temporary file and
/// renamed into place, and content is verified against its digest.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk path of a `sha256:<hex>` digest.
    pub fn path_for(&self, digest: &str) -> Result<PathBuf> {
        let hex = parse_sha256(digest)?;
        Ok(self.root.join("sha256").join(hex))
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.path_for(digest).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Store `data` under `digest`.
    ///
    /// Returns `false` if the blob was already present. Content that does
    /// not hash to `digest` is rejected.
    pub fn put(&self, digest: &str, data: &[u8]) -> Result<bool> {
        let path = self.path_for(digest)?;

        let actual = hex::encode(Sha256::digest(data));
        if parse_sha256(digest)? != actual {
            return Err(AirgapError::LayoutError(format!(
                "Digest mismatch: expected {}, content hashes to sha256:{}",
                digest, actual
            )));
        }

        if path.is_file() {
            return Ok(false);
        }

        let dir = self.root.join("sha256");
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| {
            AirgapError::LayoutError(format!(
                "Failed to create temporary blob in {}: {}",
                dir.display(),
                e
            ))
        })?;
        tmp.write_all(data).map_err(|e| {
            AirgapError::LayoutError(format!("Failed to write blob {}: {}", digest, e))
        })?;
        tmp.persist(&path).map_err(|e| {
            AirgapError::LayoutError(format!(
                "Failed to move blob into place {}: {}",
                path.display(),
                e.error
            ))
        })?;

        tracing::trace!(digest, size = data.len(), "Stored blob");
        Ok(true)
    }

    /// [`put`](Self::put) on the blocking thread pool.
    pub async fn store(&self, digest: &str, data: Vec<u8>) -> Result<bool> {
        let store = self.clone();
        let digest = digest.to_string();
        tokio::task::spawn_blocking(move || store.put(&digest, &data))
            .await
            .map_err(|e| AirgapError::LayoutError(format!("Blob write task failed: {}", e)))?
    }

    /// Open a streaming writer for the blob `digest`.
    ///
    /// Content is hashed as it is written and only moved into place by
    /// [`BlobWriter::commit`] once it matches `digest`.
    pub async fn writer(&self, digest: &str) -> Result<BlobWriter> {
        let path = self.path_for(digest)?;
        let dir = self.root.join("sha256");

        let tmp = tokio::task::spawn_blocking(move || tempfile::NamedTempFile::new_in(dir))
            .await
            .map_err(|e| AirgapError::LayoutError(format!("Blob write task failed: {}", e)))?
            .map_err(|e| {
                AirgapError::LayoutError(format!("Failed to create temporary blob for {}: {}", digest, e))
            })?;
        let (file, tmp) = tmp.into_parts();

        Ok(BlobWriter {
            digest: digest.to_string(),
            path,
            file: tokio::fs::File::from_std(file),
            tmp,
            hasher: Sha256::new(),
            written: 0,
        })
    }

    /// Read a stored blob.
    pub fn read(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.path_for(digest)?;
        std::fs::read(&path).map_err(|e| {
            AirgapError::LayoutError(format!("Failed to read blob {}: {}", digest, e))
        })
    }
}

/// Streams one blob into a [`BlobStore`].
///
/// Dropping the writer without committing discards the partial blob.
pub struct BlobWriter {
    digest: String,
    path: PathBuf,
    file: tokio::fs::File,
    tmp: tempfile::TempPath,
    hasher: Sha256,
    written: u64,
}

impl BlobWriter {
    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Verify the streamed content against the digest and move it into place.
    ///
    /// Returns `false` if the blob was already present.
    pub async fn commit(mut self) -> Result<bool> {
        self.file.flush().await.map_err(|e| {
            AirgapError::LayoutError(format!("Failed to write blob {}: {}", self.digest, e))
        })?;

        let BlobWriter {
            digest,
            path,
            file,
            tmp,
            hasher,
            written,
        } = self;
        drop(file);

        let actual = hex::encode(hasher.finalize());
        if parse_sha256(&digest)? != actual {
            return Err(AirgapError::LayoutError(format!(
                "Digest mismatch: expected {}, content hashes to sha256:{}",
                digest, actual
            )));
        }

        let stored = tokio::task::spawn_blocking(move || {
            if path.is_file() {
                return Ok::<bool, AirgapError>(false);
            }
            tmp.persist(&path).map_err(|e| {
                AirgapError::LayoutError(format!(
                    "Failed to move blob into place {}: {}",
                    path.display(),
                    e.error
                ))
            })?;
            Ok(true)
        })
        .await
        .map_err(|e| AirgapError::LayoutError(format!("Blob write task failed: {}", e)))??;

        tracing::trace!(digest = %digest, size = written, "Stored blob");
        Ok(stored)
    }
}

impl AsyncWrite for BlobWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.file).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.hasher.update(&buf[..n]);
                this.written += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_shutdown(cx)
    }
}

/// Builds an OCI image layout in a directory.
///
/// `append` may be called concurrently; `finish` writes `index.json` and
/// must only be called once every image has been appended.
#[derive(Debug)]
pub struct LayoutBuilder {
    root: PathBuf,
    blobs: BlobStore,
    entries: Mutex<BTreeMap<String, LayoutEntry>>,
}

impl LayoutBuilder {
    /// Initialise an empty layout in `dir`, creating it if needed.
    pub fn create(dir: &Path) -> Result<Self> {
        let blobs_dir = dir.join("blobs");
        std::fs::create_dir_all(blobs_dir.join("sha256")).map_err(|e| {
            AirgapError::LayoutError(format!(
                "Failed to create blobs directory in {}: {}",
                dir.display(),
                e
            ))
        })?;

        std::fs::write(dir.join("oci-layout"), OCI_LAYOUT_CONTENT).map_err(|e| {
            AirgapError::LayoutError(format!("Failed to write oci-layout: {}", e))
        })?;

        Ok(Self {
            root: dir.to_path_buf(),
            blobs: BlobStore::new(blobs_dir),
            entries: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Record `image` under `reference`'s original string.
    ///
    /// Every blob the image references must already be stored. Returns
    /// `false` if the reference string was already recorded.
    pub fn append(&self, reference: &ImageReference, image: &FetchedImage) -> Result<bool> {
        let missing = std::iter::once(&image.manifest.digest)
            .chain(image.blobs.iter())
            .find(|digest| !self.blobs.contains(digest));
        if let Some(digest) = missing {
            return Err(AirgapError::LayoutError(format!(
                "Blob {} for {} is missing from the layout",
                digest,
                reference.original()
            )));
        }

        let mut entries = self.entries.lock();
        if entries.contains_key(reference.original()) {
            tracing::debug!(reference = reference.original(), "Image already in layout");
            return Ok(false);
        }

        entries.insert(
            reference.original().to_string(),
            LayoutEntry {
                reference: reference.original().to_string(),
                canonical: reference.full_reference(),
                manifest: image.manifest.clone(),
                blobs: image.blobs.iter().cloned().collect(),
            },
        );
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of the recorded entries, sorted by reference string.
    pub fn entries(&self) -> Vec<LayoutEntry> {
        self.entries.lock().values().cloned().collect()
    }

    /// Write `index.json` and return the layout root.
    pub fn finish(self) -> Result<PathBuf> {
        let entries = self.entries.into_inner();

        let index = IndexDocument {
            schema_version: 2,
            media_type: OCI_INDEX_MEDIA_TYPE,
            manifests: entries
                .values()
                .map(|entry| IndexManifest {
                    media_type: &entry.manifest.media_type,
                    digest: &entry.manifest.digest,
                    size: entry.manifest.size,
                    annotations: BTreeMap::from([
                        (ANNOTATION_IMAGE_NAME, entry.canonical.as_str()),
                        (ANNOTATION_REF_NAME, entry.reference.as_str()),
                    ]),
                })
                .collect(),
        };

        let index_path = self.root.join("index.json");
        std::fs::write(&index_path, serde_json::to_string_pretty(&index)?).map_err(|e| {
            AirgapError::LayoutError(format!("Failed to write index.json: {}", e))
        })?;

        tracing::debug!(
            path = %self.root.display(),
            images = entries.len(),
            "OCI layout finalised"
        );
        Ok(self.root)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexDocument<'a> {
    schema_version: u8,
    media_type: &'a str,
    manifests: Vec<IndexManifest<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexManifest<'a> {
    media_type: &'a str,
    digest: &'a str,
    size: u64,
    annotations: BTreeMap<&'a str, &'a str>,
}

/// Hex part of a `sha256:<hex>` digest.
fn parse_sha256(digest: &str) -> Result<&str> {
    let hex = digest.strip_prefix("sha256:").ok_or_else(|| {
        AirgapError::LayoutError(format!("Unsupported digest algorithm: {}", digest))
    })?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
        return Err(AirgapError::LayoutError(format!("Malformed digest: {}", digest)));
    }
    Ok(hex)
}

/// `sha256:<hex>` digest of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_image(layout: &LayoutBuilder, seed: &str) -> FetchedImage {
        let config = format!("{{\"config\":\"{seed}\"}}");
        let layer = format!("layer-{seed}");
        let config_digest = sha256_digest(config.as_bytes());
        let layer_digest = sha256_digest(layer.as_bytes());
        layout.blobs().put(&config_digest, config.as_bytes()).unwrap();
        layout.blobs().put(&layer_digest, layer.as_bytes()).unwrap();

        let manifest = format!(
            "{{\"schemaVersion\":2,\"config\":\"{config_digest}\",\"layers\":[\"{layer_digest}\"]}}"
        );
        let manifest_digest = sha256_digest(manifest.as_bytes());
        layout.blobs().put(&manifest_digest, manifest.as_bytes()).unwrap();

        FetchedImage {
            manifest: Descriptor {
                media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
                digest: manifest_digest,
                size: manifest.len() as u64,
            },
            blobs: vec![config_digest, layer_digest],
        }
    }

    #[test]
    fn test_create_writes_marker() {
        let dir = TempDir::new().unwrap();
        let layout = LayoutBuilder::create(dir.path()).unwrap();

        let marker = std::fs::read_to_string(dir.path().join("oci-layout")).unwrap();
        assert_eq!(marker, OCI_LAYOUT_CONTENT);
        assert!(dir.path().join("blobs/sha256").is_dir());
        assert!(layout.is_empty());
    }

    #[test]
    fn test_blob_put_verifies_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let layout = LayoutBuilder::create(dir.path()).unwrap();
        let blobs = layout.blobs();

        let digest = sha256_digest(b"hello");
        assert!(!blobs.contains(&digest));
        assert!(blobs.put(&digest, b"hello").unwrap());
        assert!(!blobs.put(&digest, b"hello").unwrap());
        assert!(blobs.contains(&digest));
        assert_eq!(blobs.read(&digest).unwrap(), b"hello");

        let err = blobs.put(&digest, b"tampered").unwrap_err();
        assert!(err.to_string().contains("Digest mismatch"));

        assert!(blobs.put("md5:abc", b"x").is_err());
        assert!(blobs.put("sha256:../../etc/passwd", b"x").is_err());
    }

    #[test]
    fn test_blob_put_leaves_no_temporaries() {
        let dir = TempDir::new().unwrap();
        let layout = LayoutBuilder::create(dir.path()).unwrap();
        let digest = sha256_digest(b"data");
        layout.blobs().put(&digest, b"data").unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path().join("blobs/sha256"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec![digest.strip_prefix("sha256:").unwrap().to_string()]);
    }

    #[tokio::test]
    async fn test_blob_writer_streams_and_verifies() {
        let dir = TempDir::new().unwrap();
        let layout = LayoutBuilder::create(dir.path()).unwrap();
        let blobs = layout.blobs();
        let content = b"streamed layer contents".repeat(1024);
        let digest = sha256_digest(&content);

        let mut writer = blobs.writer(&digest).await.unwrap();
        for chunk in content.chunks(4096) {
            writer.write_all(chunk).await.unwrap();
        }
        assert_eq!(writer.written(), content.len() as u64);
        assert!(!blobs.contains(&digest));
        assert!(writer.commit().await.unwrap());
        assert_eq!(blobs.read(&digest).unwrap(), content);

        let mut again = blobs.writer(&digest).await.unwrap();
        again.write_all(&content).await.unwrap();
        assert!(!again.commit().await.unwrap());

        let mut tampered = blobs.writer(&digest).await.unwrap();
        tampered.write_all(b"something else").await.unwrap();
        let err = tampered.commit().await.unwrap_err();
        assert!(err.to_string().contains("Digest mismatch"));

        let abandoned = blobs.writer(&sha256_digest(b"never finished")).await.unwrap();
        drop(abandoned);

        let files = std::fs::read_dir(dir.path().join("blobs/sha256")).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_store_runs_put() {
        let dir = TempDir::new().unwrap();
        let layout = LayoutBuilder::create(dir.path()).unwrap();
        let digest = sha256_digest(b"manifest");

        assert!(layout.blobs().store(&digest, b"manifest".to_vec()).await.unwrap());
        assert!(!layout.blobs().store(&digest, b"manifest".to_vec()).await.unwrap());
        assert!(layout.blobs().store(&digest, b"other".to_vec()).await.is_err());
    }

    #[test]
    fn test_append_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let layout = LayoutBuilder::create(dir.path()).unwrap();
        let image = store_image(&layout, "a");
        let reference = ImageReference::parse("nginx:1.25").unwrap();

        assert!(layout.append(&reference, &image).unwrap());
        assert!(!layout.append(&reference, &image).unwrap());
        assert_eq!(layout.len(), 1);

        layout.finish().unwrap();
        let index: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("index.json")).unwrap()).unwrap();
        assert_eq!(index["manifests"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_append_requires_blobs() {
        let dir = TempDir::new().unwrap();
        let layout = LayoutBuilder::create(dir.path()).unwrap();
        let mut image = store_image(&layout, "a");
        image.blobs.push(sha256_digest(b"never stored"));

        let reference = ImageReference::parse("busybox").unwrap();
        let err = layout.append(&reference, &image).unwrap_err();
        assert!(matches!(err, AirgapError::LayoutError(_)));
        assert!(err.to_string().contains("busybox"));
        assert!(layout.is_empty());
    }

    #[test]
    fn test_distinct_strings_share_blobs() {
        let dir = TempDir::new().unwrap();
        let layout = LayoutBuilder::create(dir.path()).unwrap();
        let image = store_image(&layout, "nginx");

        let short = ImageReference::parse("nginx").unwrap();
        let long = ImageReference::parse("docker.io/library/nginx:latest").unwrap();
        assert!(layout.append(&short, &image).unwrap());
        assert!(layout.append(&long, &image).unwrap());

        let entries = layout.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].manifest, entries[1].manifest);
        assert_eq!(entries[0].canonical, entries[1].canonical);
    }

    #[test]
    fn test_finish_writes_sorted_annotated_index() {
        let dir = TempDir::new().unwrap();
        let layout = LayoutBuilder::create(dir.path()).unwrap();
        let redis = store_image(&layout, "redis");
        let busybox = store_image(&layout, "busybox");

        layout
            .append(&ImageReference::parse("redis:7.2").unwrap(), &redis)
            .unwrap();
        layout
            .append(&ImageReference::parse("busybox:1.36").unwrap(), &busybox)
            .unwrap();

        let root = layout.finish().unwrap();
        assert_eq!(root, dir.path());

        let index: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("index.json")).unwrap()).unwrap();
        assert_eq!(index["schemaVersion"], 2);
        assert_eq!(index["mediaType"], OCI_INDEX_MEDIA_TYPE);

        let manifests = index["manifests"].as_array().unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0]["annotations"][ANNOTATION_REF_NAME], "busybox:1.36");
        assert_eq!(
            manifests[0]["annotations"][ANNOTATION_IMAGE_NAME],
            "docker.io/library/busybox:1.36"
        );
        assert_eq!(manifests[1]["annotations"][ANNOTATION_REF_NAME], "redis:7.2");
        assert_eq!(manifests[1]["digest"], redis.manifest.digest.as_str());
        assert_eq!(manifests[1]["size"], redis.manifest.size);
    }
}
