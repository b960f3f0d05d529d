//! A3S Airgap Core - Foundational Types
//!
//! This crate provides the data model shared by the airgap runtime and CLI:
//! loosely-typed manifest objects, the tool's own configuration kind,
//! archive options, and the error taxonomy.

pub mod config;
pub mod error;
pub mod manifest;
pub mod resource;

// Re-export commonly used types
pub use config::{ArchiveOptions, Compression, LogLevel, Platform};
pub use error::{AirgapError, Result};
pub use manifest::{ManifestObject, TypeMeta};
pub use resource::{AirgapConfig, ConfigRuleSpec, ConfigSpec, CONFIG_API_VERSION, CONFIG_KIND};

/// A3S Airgap version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
