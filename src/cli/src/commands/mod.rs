//! CLI command definitions and dispatch.

mod archive;
mod images;
mod version;

use std::path::PathBuf;

use a3s_airgap_core::config::LogLevel;
use a3s_airgap_runtime::ImageReferenceSet;
use clap::{Parser, Subcommand};

/// A3S Airgap: bundle the container images referenced by Kubernetes
/// manifests into one OCI image archive.
#[derive(Parser)]
#[command(name = "a3s-airgap", version, about)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Pull every referenced image and write an OCI layout archive
    Archive(archive::ArchiveArgs),
    /// List the image references found in the manifests
    Images(images::ImagesArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Archive(args) => archive::execute(args).await,
        Command::Images(args) => images::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

/// Load manifests from `paths` and extract their image references.
pub(crate) fn scan_manifests(paths: &[PathBuf]) -> Result<ImageReferenceSet, Box<dyn std::error::Error>> {
    let objects = a3s_airgap_runtime::load_objects_from_paths(paths)?;
    tracing::debug!(objects = objects.len(), "Loaded manifests");

    let images = a3s_airgap_runtime::collect_image_references(&objects)?;
    for image in images.iter() {
        tracing::info!(image, "Found image");
    }

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_archive_defaults() {
        let cli = Cli::try_parse_from(["a3s-airgap", "archive", "-f", "deploy/"]).unwrap();
        assert_eq!(cli.log_level, LogLevel::Info);
        match cli.command {
            Command::Archive(args) => {
                assert_eq!(args.file, vec![PathBuf::from("deploy/")]);
                assert_eq!(args.output, PathBuf::from("images.tar"));
                assert!(args.platform.is_none());
                assert!(args.compression.is_none());
                assert!(!args.quiet);
            }
            _ => panic!("expected archive command"),
        }
    }

    #[test]
    fn test_parse_archive_flags() {
        let cli = Cli::try_parse_from([
            "a3s-airgap",
            "archive",
            "-f",
            "a.yaml",
            "-f",
            "-",
            "-o",
            "out/images.tar.zst",
            "-p",
            "linux/arm64/v8",
            "--compression",
            "xz",
            "--concurrency",
            "8",
            "--quiet",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.log_level, LogLevel::Debug);
        match cli.command {
            Command::Archive(args) => {
                assert_eq!(args.file.len(), 2);
                assert_eq!(args.file[1], PathBuf::from("-"));
                assert_eq!(args.platform.unwrap().to_string(), "linux/arm64/v8");
                assert_eq!(args.compression, Some(a3s_airgap_core::Compression::Xz));
                assert_eq!(args.concurrency, 8);
                assert!(args.quiet);
            }
            _ => panic!("expected archive command"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(Cli::try_parse_from(["a3s-airgap", "archive"]).is_err());
        assert!(Cli::try_parse_from(["a3s-airgap", "archive", "-f", "x", "-p", "linux"]).is_err());
        assert!(Cli::try_parse_from(["a3s-airgap", "archive", "-f", "x", "--compression", "lz4"]).is_err());
        assert!(Cli::try_parse_from(["a3s-airgap", "archive", "-f", "x", "--concurrency", "0"]).is_err());
        assert!(Cli::try_parse_from(["a3s-airgap", "--log-level", "loud", "version"]).is_err());
    }
}
