//! A3S Airgap CLI - package the images of Kubernetes manifests for offline use.

pub mod commands;
pub mod output;
