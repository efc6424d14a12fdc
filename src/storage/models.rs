//! Model discovery
//!
//! Finds GGUF model files in the models directory.

use std::fs;
use std::path::Path;

use crate::storage::StorageError;
use crate::types::model::ModelDescriptor;

/// Scan a directory for `.gguf` files, sorted by name.
///
/// A missing directory yields an empty list.
pub fn scan_models_directory(dir: &Path) -> Result<Vec<ModelDescriptor>, StorageError> {
    if !dir.exists() {
        tracing::debug!("Models directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut models = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_gguf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gguf"))
            .unwrap_or(false);
        if !is_gguf {
            continue;
        }

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        models.push(ModelDescriptor::new(name, path.to_string_lossy().to_string()));
    }

    models.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!("Found {} models in {}", models.len(), dir.display());
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_finds_only_gguf_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("qwen.gguf"), b"").unwrap();
        fs::write(dir.path().join("Llama.GGUF"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("sub.gguf")).unwrap();

        let models = scan_models_directory(dir.path()).unwrap();
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Llama", "qwen"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let models = scan_models_directory(&dir.path().join("missing")).unwrap();
        assert!(models.is_empty());
    }
}
