//! A3S Airgap Runtime - image discovery and offline archive assembly.
//!
//! Loads Kubernetes manifests, extracts the container images they reference,
//! pulls those images from their registries, and packs them into a single
//! OCI image layout archive for air-gapped installs.

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod extract;
pub mod loader;
pub mod oci;
pub mod pipeline;

pub use archive::{serialize, serialize_until, ArchiveStats};
pub use extract::{
    collect_image_references, ExtractionRule, ImageReferenceExtractor, ImageReferenceSet,
    PathExpr, RuleRegistry,
};
pub use loader::{load_objects_from_paths, load_objects_from_reader};
pub use oci::{
    BlobStore, BlobWriter, DockerCredentials, FetchedImage, ImageFetcher, ImageReference,
    LayoutBuilder, RegistryAuth, RegistryPuller,
};
pub use pipeline::{create_archive, ArchiveSummary};

/// A3S Airgap Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
