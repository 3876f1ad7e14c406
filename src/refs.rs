//! Materializes in-memory reference libraries to disk.
//!
//! `rustc` resolves references by path only, so reference images a host holds
//! in memory (e.g. embedded in its own binary) must be written out before an
//! invocation can use them.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::CompileConfig;

/// Resolve the full reference set for one compile call: configured on-disk
/// references, then materialized (or reused) in-memory references, then the
/// host's capability modules.
pub fn resolve_references(config: &CompileConfig) -> Result<Vec<PathBuf>> {
    let mut refs: Vec<PathBuf> = config.references_on_disk.clone();
    let temp_dir = config.reference_temp_directory();
    if config.reuse_materialized_references {
        refs.extend(enumerate_materialized(&temp_dir)?);
    } else {
        refs.extend(materialize(&config.references_in_memory, &temp_dir)?);
    }
    refs.extend(config.capability_modules.iter().cloned());
    Ok(refs)
}

/// Write each image to a numbered file (`ref_asm0.rlib`, `ref_asm1.rlib`, …)
/// under `temp_dir`, creating the directory if absent, and return the written
/// paths. Files are overwritten by index on repeat calls; pre-existing files
/// with other names are left alone.
pub fn materialize(images: &[Vec<u8>], temp_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(images.len());
    for (index, image) in images.iter().enumerate() {
        fs::create_dir_all(temp_dir).with_context(|| {
            format!(
                "failed to create reference temp directory {}",
                temp_dir.display()
            )
        })?;
        let path = temp_dir.join(format!("ref_asm{index}.rlib"));
        fs::write(&path, image)
            .with_context(|| format!("failed to write reference file {}", path.display()))?;
        debug!(path = %path.display(), bytes = image.len(), "materialized reference");
        written.push(path);
    }
    Ok(written)
}

/// Return every file already present in `temp_dir`, unchanged. No staleness
/// check: the caller asserts the directory's contents are the right reference
/// set for this call. A missing directory yields an empty set.
fn enumerate_materialized(temp_dir: &Path) -> Result<Vec<PathBuf>> {
    if !temp_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    let entries = fs::read_dir(temp_dir).with_context(|| {
        format!(
            "failed to read reference temp directory {}",
            temp_dir.display()
        )
    })?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    // read_dir order is platform-dependent; keep the reference order stable.
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("refs");
        let images = vec![vec![1u8, 2, 3], vec![4u8, 5]];

        let written = materialize(&images, &temp).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].file_name().unwrap(), "ref_asm0.rlib");
        assert_eq!(written[1].file_name().unwrap(), "ref_asm1.rlib");
        assert_eq!(fs::read(&written[1]).unwrap(), vec![4u8, 5]);
    }

    #[test]
    fn materialize_overwrites_by_index_on_second_run() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("refs");
        materialize(&[vec![1u8; 8]], &temp).unwrap();

        let written = materialize(&[vec![9u8; 4]], &temp).unwrap();
        assert_eq!(fs::read(&written[0]).unwrap(), vec![9u8; 4]);
    }

    #[test]
    fn enumerate_returns_existing_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.rlib"), b"b").unwrap();
        fs::write(dir.path().join("a.rlib"), b"a").unwrap();

        let paths = enumerate_materialized(dir.path()).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.rlib", "b.rlib"]);
    }

    #[test]
    fn enumerate_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let paths = enumerate_materialized(&dir.path().join("absent")).unwrap();
        assert!(paths.is_empty());
    }
}
