//! Serialize an OCI layout directory into a single (optionally compressed)
//! tar archive.
//!
//! The archive is built in a temporary file next to the output and renamed
//! into place only once complete, so the output path never holds a partial
//! archive.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use a3s_airgap_core::error::{AirgapError, Result};
use a3s_airgap_core::Compression;
use walkdir::WalkDir;

/// Files at the layout root, written before any blob.
const LAYOUT_ROOT_FILES: &[&str] = &["oci-layout", "index.json"];

/// Mode of the finished archive.
#[cfg(unix)]
const ARCHIVE_MODE: u32 = 0o644;

/// Summary of a written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    pub path: PathBuf,
    pub compression: Compression,
    /// Tar entries written (files and directories)
    pub entries: usize,
    /// Uncompressed size of the file contents
    pub content_bytes: u64,
    /// Size of the archive on disk
    pub archive_bytes: u64,
}

/// Write `layout_dir` to `output` as a tar stream compressed with `compression`.
pub fn serialize(layout_dir: &Path, output: &Path, compression: Compression) -> Result<ArchiveStats> {
    serialize_until(layout_dir, output, compression, &AtomicBool::new(false))
}

/// Like [`serialize`], but stops with [`AirgapError::Cancelled`] once
/// `cancel` is set. `output` is only replaced if `cancel` is still clear
/// after the archive is complete.
pub fn serialize_until(
    layout_dir: &Path,
    output: &Path,
    compression: Compression,
    cancel: &AtomicBool,
) -> Result<ArchiveStats> {
    let archive_error = |message: String| AirgapError::ArchiveError {
        path: output.display().to_string(),
        message,
    };

    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = output
        .file_name()
        .ok_or_else(|| archive_error("output path has no file name".to_string()))?
        .to_string_lossy()
        .into_owned();

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(&parent)
        .map_err(|e| archive_error(format!("Failed to create temporary file in {}: {}", parent.display(), e)))?;

    tracing::debug!(
        layout = %layout_dir.display(),
        output = %output.display(),
        compression = %compression,
        "Writing archive"
    );

    let (entries, content_bytes) = {
        let writer = ArchiveWriter::new(BufWriter::new(tmp.as_file_mut()), compression)
            .map_err(|e| archive_error(format!("Failed to initialise {} encoder: {}", compression, e)))?;
        let mut builder = tar::Builder::new(writer);

        let counts = append_layout(&mut builder, layout_dir, cancel).map_err(|e| {
            if cancel.load(Ordering::SeqCst) {
                AirgapError::Cancelled
            } else {
                archive_error(e)
            }
        })?;

        let writer = builder
            .into_inner()
            .map_err(|e| archive_error(format!("Failed to finalize tar stream: {}", e)))?;
        writer
            .finish()
            .and_then(|mut buffered| buffered.flush())
            .map_err(|e| archive_error(format!("Failed to finalize {} stream: {}", compression, e)))?;
        counts
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(ARCHIVE_MODE))
            .map_err(|e| archive_error(format!("Failed to set archive permissions: {}", e)))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| archive_error(format!("Failed to sync archive: {}", e)))?;

    if cancel.load(Ordering::SeqCst) {
        return Err(AirgapError::Cancelled);
    }
    tmp.persist(output)
        .map_err(|e| archive_error(format!("Failed to move archive into place: {}", e.error)))?;

    let archive_bytes = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);

    tracing::debug!(
        output = %output.display(),
        entries,
        content_bytes,
        archive_bytes,
        "Archive written"
    );

    Ok(ArchiveStats {
        path: output.to_path_buf(),
        compression,
        entries,
        content_bytes,
        archive_bytes,
    })
}

/// Append the layout in a fixed order: root files, then `blobs/` sorted by path.
fn append_layout<W: Write>(
    builder: &mut tar::Builder<W>,
    layout_dir: &Path,
    cancel: &AtomicBool,
) -> std::result::Result<(usize, u64), String> {
    let mut entries = 0;
    let mut bytes = 0;

    for name in LAYOUT_ROOT_FILES {
        let path = layout_dir.join(name);
        if !path.is_file() {
            return Err(format!("{} is missing from layout {}", name, layout_dir.display()));
        }
        bytes += append_file(builder, &path, Path::new(name))?;
        entries += 1;
    }

    let blobs_dir = layout_dir.join("blobs");
    for entry in WalkDir::new(&blobs_dir).sort_by_file_name() {
        if cancel.load(Ordering::SeqCst) {
            return Err("cancelled".to_string());
        }
        let entry = entry.map_err(|e| format!("Failed to read {}: {}", blobs_dir.display(), e))?;
        let relative = entry
            .path()
            .strip_prefix(layout_dir)
            .map_err(|e| format!("Failed to strip prefix: {}", e))?;

        if entry.file_type().is_dir() {
            append_dir(builder, relative)?;
        } else if entry.file_type().is_file() {
            bytes += append_file(builder, entry.path(), relative)?;
        } else {
            continue;
        }
        entries += 1;
    }

    Ok((entries, bytes))
}

/// Header with fixed ownership and timestamp.
fn deterministic_header(entry_type: tar::EntryType, mode: u32, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn append_dir<W: Write>(builder: &mut tar::Builder<W>, name: &Path) -> std::result::Result<(), String> {
    let mut header = deterministic_header(tar::EntryType::Directory, 0o755, 0);
    builder
        .append_data(&mut header, name, io::empty())
        .map_err(|e| format!("Failed to add directory {}: {}", name.display(), e))
}

fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    name: &Path,
) -> std::result::Result<u64, String> {
    let file = File::open(path).map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
    let size = file
        .metadata()
        .map_err(|e| format!("Failed to stat {}: {}", path.display(), e))?
        .len();

    let mut header = deterministic_header(tar::EntryType::Regular, 0o644, size);
    builder
        .append_data(&mut header, name, file)
        .map_err(|e| format!("Failed to add {}: {}", name.display(), e))?;
    Ok(size)
}

/// Compression stage between the tar builder and the output file.
enum ArchiveWriter<W: Write> {
    Plain(W),
    Gzip(flate2::write::GzEncoder<W>),
    Bzip2(bzip2::write::BzEncoder<W>),
    Xz(xz2::write::XzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> ArchiveWriter<W> {
    fn new(inner: W, compression: Compression) -> io::Result<Self> {
        Ok(match compression {
            Compression::None => Self::Plain(inner),
            Compression::Gzip => Self::Gzip(flate2::write::GzEncoder::new(
                inner,
                flate2::Compression::default(),
            )),
            Compression::Bzip2 => Self::Bzip2(bzip2::write::BzEncoder::new(
                inner,
                bzip2::Compression::default(),
            )),
            Compression::Xz => Self::Xz(xz2::write::XzEncoder::new(inner, 6)),
            Compression::Zstd => Self::Zstd(zstd::stream::write::Encoder::new(
                inner,
                zstd::DEFAULT_COMPRESSION_LEVEL,
            )?),
        })
    }

    /// Write any trailer and return the inner writer.
    fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(w) => Ok(w),
            Self::Gzip(e) => e.finish(),
            Self::Bzip2(e) => e.finish(),
            Self::Xz(e) => e.finish(),
            Self::Zstd(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for ArchiveWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(e) => e.write(buf),
            Self::Bzip2(e) => e.write(buf),
            Self::Xz(e) => e.write(buf),
            Self::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(e) => e.flush(),
            Self::Bzip2(e) => e.flush(),
            Self::Xz(e) => e.flush(),
            Self::Zstd(e) => e.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::layout::{sha256_digest, Descriptor, FetchedImage, LayoutBuilder};
    use crate::oci::ImageReference;
    use std::io::Read;
    use tempfile::TempDir;

    fn build_layout(dir: &Path) {
        let layout = LayoutBuilder::create(dir).unwrap();
        let layer = b"layer contents".to_vec();
        let config = b"{\"architecture\":\"amd64\"}".to_vec();
        let manifest = b"{\"schemaVersion\":2}".to_vec();
        for data in [&layer, &config, &manifest] {
            layout.blobs().put(&sha256_digest(data), data).unwrap();
        }

        let image = FetchedImage {
            manifest: Descriptor {
                media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
                digest: sha256_digest(&manifest),
                size: manifest.len() as u64,
            },
            blobs: vec![sha256_digest(&config), sha256_digest(&layer)],
        };
        layout
            .append(&ImageReference::parse("busybox:1.36").unwrap(), &image)
            .unwrap();
        layout.finish().unwrap();
    }

    fn entry_names<R: Read>(reader: R) -> Vec<String> {
        let mut archive = tar::Archive::new(reader);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn open_decoded(path: &Path, compression: Compression) -> Box<dyn Read> {
        let file = File::open(path).unwrap();
        match compression {
            Compression::None => Box::new(file),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(file)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(file)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(file).unwrap()),
        }
    }

    #[test]
    fn test_serialize_entry_order() {
        let layout = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        build_layout(layout.path());

        let output = out.path().join("images.tar");
        let stats = serialize(layout.path(), &output, Compression::None).unwrap();

        let names = entry_names(File::open(&output).unwrap());
        assert_eq!(names[0], "oci-layout");
        assert_eq!(names[1], "index.json");
        assert_eq!(names[2], "blobs");
        assert_eq!(names[3], "blobs/sha256");
        assert_eq!(names.len(), 7);

        let blob_names = &names[4..];
        let mut sorted = blob_names.to_vec();
        sorted.sort();
        assert_eq!(blob_names, sorted.as_slice());

        assert_eq!(stats.entries, 7);
        assert_eq!(stats.compression, Compression::None);
        assert_eq!(stats.archive_bytes, std::fs::metadata(&output).unwrap().len());
    }

    #[test]
    fn test_serialize_every_compression_is_readable() {
        let layout = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        build_layout(layout.path());

        for compression in [
            Compression::None,
            Compression::Gzip,
            Compression::Bzip2,
            Compression::Xz,
            Compression::Zstd,
        ] {
            let output = out.path().join(format!("images-{compression}.tar"));
            serialize(layout.path(), &output, compression).unwrap();

            let names = entry_names(open_decoded(&output, compression));
            assert_eq!(names.len(), 7, "{compression}");
            assert!(names.contains(&"index.json".to_string()), "{compression}");
        }
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let layout = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        build_layout(layout.path());

        let first = out.path().join("a.tar.gz");
        let second = out.path().join("b.tar.gz");
        serialize(layout.path(), &first, Compression::Gzip).unwrap();
        serialize(layout.path(), &second, Compression::Gzip).unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    }

    #[test]
    fn test_headers_are_normalized() {
        let layout = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        build_layout(layout.path());

        let output = out.path().join("images.tar");
        serialize(layout.path(), &output, Compression::None).unwrap();

        let mut archive = tar::Archive::new(File::open(&output).unwrap());
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let header = entry.header();
            assert_eq!(header.mtime().unwrap(), 0);
            assert_eq!(header.uid().unwrap(), 0);
            assert_eq!(header.gid().unwrap(), 0);
        }
    }

    #[test]
    fn test_failure_leaves_no_output() {
        let layout = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        LayoutBuilder::create(layout.path()).unwrap();
        // index.json never written

        let output = out.path().join("images.tar");
        let err = serialize(layout.path(), &output, Compression::Zstd).unwrap_err();

        assert!(matches!(err, AirgapError::ArchiveError { .. }));
        assert!(err.to_string().contains("index.json"));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cancelled_serialize_leaves_no_output() {
        let layout = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        build_layout(layout.path());

        let output = out.path().join("images.tar");
        std::fs::write(&output, b"previous").unwrap();
        let cancel = AtomicBool::new(true);
        let err = serialize_until(layout.path(), &output, Compression::Gzip, &cancel).unwrap_err();

        assert!(matches!(err, AirgapError::Cancelled));
        assert_eq!(std::fs::read(&output).unwrap(), b"previous");
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_archive_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let layout = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        build_layout(layout.path());

        let output = out.path().join("images.tar");
        serialize(layout.path(), &output, Compression::None).unwrap();

        let mode = std::fs::metadata(&output).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_existing_output_replaced() {
        let layout = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        build_layout(layout.path());

        let output = out.path().join("images.tar");
        std::fs::write(&output, b"stale").unwrap();
        serialize(layout.path(), &output, Compression::None).unwrap();

        let names = entry_names(File::open(&output).unwrap());
        assert_eq!(names[0], "oci-layout");
    }

    #[test]
    fn test_missing_output_dir_is_error() {
        let layout = TempDir::new().unwrap();
        build_layout(layout.path());

        let output = layout.path().join("no/such/dir/images.tar");
        let err = serialize(layout.path(), &output, Compression::None).unwrap_err();
        assert!(matches!(err, AirgapError::ArchiveError { .. }));
    }
}
