//! `a3s-airgap archive` command.

use std::path::PathBuf;

use a3s_airgap_core::config::DEFAULT_FETCH_CONCURRENCY;
use a3s_airgap_core::{AirgapError, ArchiveOptions, Compression, Platform};
use a3s_airgap_runtime::{create_archive, RegistryPuller};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct ArchiveArgs {
    /// Manifest file or directory to scan; repeatable, "-" reads stdin
    #[arg(short, long, required = true)]
    pub file: Vec<PathBuf>,

    /// Output archive path; compression is inferred from the extension
    /// (.tar, .tar.gz, .tar.bz2, .tar.xz, .tar.zst)
    #[arg(short, long, default_value = "images.tar")]
    pub output: PathBuf,

    /// Platform to pull for multi-arch images (e.g., "linux/amd64", "linux/arm64/v8")
    #[arg(short, long)]
    pub platform: Option<Platform>,

    /// Compression override (none, gzip, bzip2, xz, zstd)
    #[arg(long)]
    pub compression: Option<Compression>,

    /// Maximum number of images pulled concurrently
    #[arg(long, default_value_t = DEFAULT_FETCH_CONCURRENCY, value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Suppress per-image progress
    #[arg(short, long)]
    pub quiet: bool,

    /// Directory for the temporary image layout (defaults to the system temp dir)
    #[arg(long)]
    pub tmp_dir: Option<PathBuf>,
}

pub async fn execute(args: ArchiveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let images = super::scan_manifests(&args.file)?;

    let options = ArchiveOptions {
        platform: args.platform.clone(),
        compression: args.compression,
        progress: !args.quiet,
        concurrency: args.concurrency,
        scratch_dir: args.tmp_dir.clone(),
    };

    if !args.quiet {
        println!(
            "Archiving {} images to {}...",
            images.len(),
            args.output.display()
        );
    }

    let puller = RegistryPuller::new(options.platform.clone());

    // Dropping the pipeline on Ctrl-C removes its scratch layout; the output
    // is only ever written by the final rename.
    let summary = tokio::select! {
        result = create_archive(&puller, &images, &args.output, &options) => result?,
        _ = tokio::signal::ctrl_c() => return Err(AirgapError::Cancelled.into()),
    };

    if args.quiet {
        println!("{}", summary.stats.path.display());
    } else {
        println!(
            "Archived {} images to {} ({}, {})",
            summary.images,
            summary.stats.path.display(),
            summary.stats.compression,
            output::format_bytes(summary.stats.archive_bytes)
        );
    }

    Ok(())
}

fn parse_concurrency(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("concurrency must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid concurrency '{}': {}", s, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_concurrency() {
        assert_eq!(parse_concurrency("1"), Ok(1));
        assert_eq!(parse_concurrency("16"), Ok(16));
        assert!(parse_concurrency("0").is_err());
        assert!(parse_concurrency("-2").is_err());
        assert!(parse_concurrency("many").is_err());
    }
}
