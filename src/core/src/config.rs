use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of images fetched concurrently.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// Options controlling archive assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Platform to select from multi-arch images (None = linux on the host architecture)
    pub platform: Option<Platform>,

    /// Compression override (None = infer from the output extension)
    pub compression: Option<Compression>,

    /// Report per-image progress at info level
    pub progress: bool,

    /// Maximum number of images fetched concurrently
    pub concurrency: usize,

    /// Parent directory for the scratch layout (None = system temp dir)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            platform: None,
            compression: None,
            progress: true,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
            scratch_dir: None,
        }
    }
}

impl ArchiveOptions {
    /// Compression to use for `output`: the explicit override, else inferred.
    pub fn compression_for(&self, output: &Path) -> Compression {
        self.compression
            .unwrap_or_else(|| Compression::from_path(output))
    }
}

/// Byte-stream transform applied to the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// Infer compression from a file name's extension.
    ///
    /// Unknown extensions (including plain `.tar`) map to `None`.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        const SUFFIXES: &[(&str, Compression)] = &[
            (".tar.gz", Compression::Gzip),
            (".tgz", Compression::Gzip),
            (".tar.bz2", Compression::Bzip2),
            (".tbz2", Compression::Bzip2),
            (".tar.xz", Compression::Xz),
            (".txz", Compression::Xz),
            (".tar.zst", Compression::Zstd),
            (".tar.zstd", Compression::Zstd),
            (".tzst", Compression::Zstd),
        ];

        SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|(_, c)| *c)
            .unwrap_or(Compression::None)
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Gzip => write!(f, "gzip"),
            Self::Bzip2 => write!(f, "bzip2"),
            Self::Xz => write!(f, "xz"),
            Self::Zstd => write!(f, "zstd"),
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "bzip2" | "bz2" => Ok(Self::Bzip2),
            "xz" => Ok(Self::Xz),
            "zstd" | "zst" => Ok(Self::Zstd),
            _ => Err(format!(
                "unknown compression: '{}' (supported: none, gzip, bzip2, xz, zstd)",
                s
            )),
        }
    }
}

/// Target platform for multi-arch image selection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl Platform {
    /// Linux on the host CPU architecture, using OCI architecture names.
    pub fn host_linux() -> Self {
        let architecture = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "powerpc64" => "ppc64le",
            other => other,
        };

        Self {
            os: "linux".to_string(),
            architecture: architecture.to_string(),
            variant: None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    /// Parse `os/arch[/variant]`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if !(2..=3).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
            return Err(format!(
                "invalid platform '{}': expected os/arch[/variant]",
                s
            ));
        }

        Ok(Self {
            os: parts[0].to_string(),
            architecture: parts[1].to_string(),
            variant: parts.get(2).map(|v| v.to_string()),
        })
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: '{}' (supported: trace, debug, info, warn, error)",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_from_path() {
        let cases = [
            ("images.tar", Compression::None),
            ("images", Compression::None),
            ("images.tar.gz", Compression::Gzip),
            ("out/images.TGZ", Compression::Gzip),
            ("images.tar.bz2", Compression::Bzip2),
            ("images.tar.xz", Compression::Xz),
            ("images.tar.zst", Compression::Zstd),
            ("images.tzst", Compression::Zstd),
            ("images.gz", Compression::None),
        ];
        for (path, expected) in cases {
            assert_eq!(Compression::from_path(Path::new(path)), expected, "{path}");
        }
    }

    #[test]
    fn test_compression_override_wins() {
        let opts = ArchiveOptions {
            compression: Some(Compression::Zstd),
            ..Default::default()
        };
        assert_eq!(opts.compression_for(Path::new("images.tar")), Compression::Zstd);

        let opts = ArchiveOptions::default();
        assert_eq!(opts.compression_for(Path::new("images.tar.xz")), Compression::Xz);
    }

    #[test]
    fn test_compression_from_str() {
        assert_eq!("gzip".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("ZSTD".parse::<Compression>().unwrap(), Compression::Zstd);
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert!("lz4".parse::<Compression>().is_err());
    }

    #[test]
    fn test_platform_parse() {
        let p: Platform = "linux/arm64/v8".parse().unwrap();
        assert_eq!(p.os, "linux");
        assert_eq!(p.architecture, "arm64");
        assert_eq!(p.variant.as_deref(), Some("v8"));
        assert_eq!(p.to_string(), "linux/arm64/v8");

        let p: Platform = "linux/amd64".parse().unwrap();
        assert_eq!(p.variant, None);
        assert_eq!(p.to_string(), "linux/amd64");
    }

    #[test]
    fn test_platform_parse_invalid() {
        for input in ["linux", "", "linux/", "/amd64", "linux/arm/v7/extra"] {
            assert!(input.parse::<Platform>().is_err(), "{input}");
        }
    }

    #[test]
    fn test_host_linux() {
        let p = Platform::host_linux();
        assert_eq!(p.os, "linux");
        assert!(!p.architecture.is_empty());
        assert_ne!(p.architecture, "x86_64");
    }

    #[test]
    fn test_log_level_roundtrip() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let parsed: LogLevel = level.parse().unwrap();
            assert_eq!(parsed.to_string(), level);
        }
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!(tracing::Level::from(LogLevel::Warn), tracing::Level::WARN);
    }

    #[test]
    fn test_archive_options_default() {
        let opts = ArchiveOptions::default();
        assert!(opts.progress);
        assert_eq!(opts.concurrency, DEFAULT_FETCH_CONCURRENCY);
        assert!(opts.platform.is_none());
        assert!(opts.compression.is_none());
    }
}
