//! Manifest discovery and decoding.
//!
//! Inputs may be files, directories (walked recursively in file-name order,
//! skipping hidden entries), or `-` for standard input. Each input holds one
//! or more YAML documents separated by `---`, or a stream of JSON objects.
//! Document order is preserved and YAML merge keys are resolved.

use std::io::Read;
use std::path::Path;

use a3s_airgap_core::error::{AirgapError, Result};
use a3s_airgap_core::ManifestObject;
use serde::Deserialize;
use serde_json::Value;
use walkdir::{DirEntry, WalkDir};

/// Path that designates standard input.
pub const STDIN_MARKER: &str = "-";

/// Load every manifest object from `paths`, in order.
pub fn load_objects_from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<ManifestObject>> {
    let mut objects = Vec::new();

    for path in paths {
        let path = path.as_ref();

        if path.as_os_str() == STDIN_MARKER {
            objects.extend(load_objects_from_reader(std::io::stdin().lock(), "<stdin>")?);
            continue;
        }

        let metadata = std::fs::metadata(path).map_err(|e| input_error(path, e))?;
        if metadata.is_dir() {
            objects.extend(load_objects_from_dir(path)?);
        } else {
            objects.extend(load_objects_from_file(path)?);
        }
    }

    Ok(objects)
}

/// Load a single manifest file.
pub fn load_objects_from_file(path: &Path) -> Result<Vec<ManifestObject>> {
    let content = std::fs::read_to_string(path).map_err(|e| input_error(path, e))?;
    let objects = load_objects_from_str(&content, &path.display().to_string())?;

    tracing::debug!(path = %path.display(), count = objects.len(), "Loaded manifest file");
    Ok(objects)
}

fn load_objects_from_dir(dir: &Path) -> Result<Vec<ManifestObject>> {
    let mut objects = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|e| AirgapError::InputError {
            path: e
                .path()
                .unwrap_or(dir)
                .display()
                .to_string(),
            message: e.to_string(),
        })?;

        if entry.file_type().is_file() {
            objects.extend(load_objects_from_file(entry.path())?);
        }
    }

    Ok(objects)
}

/// Load manifests from a reader. `source` names the input in errors.
pub fn load_objects_from_reader<R: Read>(mut reader: R, source: &str) -> Result<Vec<ManifestObject>> {
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .map_err(|e| AirgapError::InputError {
            path: source.to_string(),
            message: e.to_string(),
        })?;
    load_objects_from_str(&content, source)
}

/// Decode a YAML document stream or a JSON object stream.
pub fn load_objects_from_str(content: &str, source: &str) -> Result<Vec<ManifestObject>> {
    let decode_error = |index: usize, message: String| AirgapError::InputError {
        path: source.to_string(),
        message: format!("document {}: {}", index + 1, message),
    };

    let documents: Vec<Value> = if content.trim_start().starts_with('{') {
        serde_json::Deserializer::from_str(content)
            .into_iter::<Value>()
            .enumerate()
            .map(|(i, doc)| doc.map_err(|e| decode_error(i, e.to_string())))
            .collect::<Result<_>>()?
    } else {
        serde_yaml::Deserializer::from_str(content)
            .enumerate()
            .map(|(i, doc)| decode_yaml_document(doc).map_err(|e| decode_error(i, e)))
            .collect::<Result<_>>()?
    };

    documents
        .into_iter()
        .enumerate()
        .filter(|(_, doc)| !doc.is_null())
        .map(|(i, doc)| {
            ManifestObject::from_value(doc).map_err(|e| match e {
                AirgapError::SerializationError(message) => decode_error(i, message),
                other => other,
            })
        })
        .collect()
}

/// Decode one YAML document, resolving `<<` merge keys.
fn decode_yaml_document(document: serde_yaml::Deserializer<'_>) -> std::result::Result<Value, String> {
    let mut value = serde_yaml::Value::deserialize(document).map_err(|e| e.to_string())?;
    value.apply_merge().map_err(|e| e.to_string())?;
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn input_error(path: &Path, err: std::io::Error) -> AirgapError {
    AirgapError::InputError {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
