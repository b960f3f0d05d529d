//! Archive pipeline: resolve references, fetch concurrently into a scratch
//! layout, then serialize once every fetch has succeeded.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use a3s_airgap_core::error::{AirgapError, Result};
use a3s_airgap_core::ArchiveOptions;
use futures::{StreamExt, TryStreamExt};

use crate::archive::{self, ArchiveStats};
use crate::extract::ImageReferenceSet;
use crate::oci::{ImageFetcher, ImageReference, LayoutBuilder};

/// Outcome of a successful archive run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Number of index entries (distinct reference strings)
    pub images: usize,
    pub stats: ArchiveStats,
}

/// Fetch every image in `images` and write them to `output` as one OCI
/// layout archive.
///
/// All references are parsed before anything is fetched. The first failure
/// aborts the run, leaving `output` untouched. The scratch layout is removed
/// on every exit path, including when the returned future is dropped.
pub async fn create_archive<F>(
    fetcher: &F,
    images: &ImageReferenceSet,
    output: &Path,
    options: &ArchiveOptions,
) -> Result<ArchiveSummary>
where
    F: ImageFetcher + ?Sized,
{
    let references = images
        .iter()
        .map(ImageReference::parse)
        .collect::<Result<Vec<_>>>()?;

    if references.is_empty() {
        tracing::warn!("No image references found; writing an empty archive");
    }

    let mut scratch_builder = tempfile::Builder::new();
    scratch_builder.prefix("a3s-airgap-");
    let scratch = match options.scratch_dir {
        Some(ref dir) => scratch_builder.tempdir_in(dir),
        None => scratch_builder.tempdir(),
    }
    .map_err(|e| AirgapError::LayoutError(format!("Failed to create scratch directory: {}", e)))?;

    tracing::debug!(scratch = %scratch.path().display(), "Created scratch layout");
    let layout = LayoutBuilder::create(scratch.path())?;

    let total = references.len();
    let completed = AtomicUsize::new(0);
    let concurrency = options.concurrency.max(1);

    futures::stream::iter(references.iter())
        .map(Ok::<_, AirgapError>)
        .try_for_each_concurrent(concurrency, |reference| {
            let layout = &layout;
            let completed = &completed;
            async move {
                tracing::debug!(reference = reference.original(), "Fetching image");

                let image = fetcher.fetch(reference, layout.blobs()).await?;
                layout.append(reference, &image)?;

                let n = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if options.progress {
                    tracing::info!(
                        reference = reference.original(),
                        digest = %image.manifest.digest,
                        "Fetched image {}/{}",
                        n,
                        total
                    );
                } else {
                    tracing::debug!(
                        reference = reference.original(),
                        digest = %image.manifest.digest,
                        "Fetched image {}/{}",
                        n,
                        total
                    );
                }
                Ok(())
            }
        })
        .await?;

    let entries = layout.len();
    let layout_dir = tokio::task::spawn_blocking(move || layout.finish())
        .await
        .map_err(|e| AirgapError::LayoutError(format!("Layout task failed: {}", e)))??;

    // Serialization outlives this future if it is dropped; the guard tells it
    // to stop before replacing `output`.
    let cancel = CancelOnDrop::default();
    let compression = options.compression_for(output);
    let stats = {
        let flag = cancel.flag();
        let target = output.to_path_buf();
        tokio::task::spawn_blocking(move || {
            archive::serialize_until(&layout_dir, &target, compression, &flag)
        })
        .await
        .map_err(|e| AirgapError::ArchiveError {
            path: output.display().to_string(),
            message: format!("Archive task failed: {}", e),
        })??
    };

    tracing::info!(
        output = %output.display(),
        images = entries,
        size = stats.archive_bytes,
        compression = %compression,
        "Archive created"
    );

    drop(scratch);
    Ok(ArchiveSummary {
        images: entries,
        stats,
    })
}

/// Raises its flag when dropped.
#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl CancelOnDrop {
    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}
