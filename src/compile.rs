//! Top-level orchestration: reference resolution, invocation, provenance,
//! cleanup.
//!
//! [`compile`] is the one public entry point. It never returns an error;
//! anything escaping the inner run marks the result with `generic_failure`
//! and forces cleanup of both the temp-reference and output directories.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::CompileConfig;
use crate::invoker;
use crate::provenance::{self, DwarfResolver, SourceResolver};
use crate::refs;
use crate::result::{CompileResult, CompiledUnit};
use crate::MERGED_UNIT_NAME;

/// Compile the configured source files and resolve per-type provenance.
///
/// Always returns a result value; check [`CompileResult::generic_failure`]
/// before trusting any other field. On generic failure everything the call
/// produced has been deleted and must be discarded.
pub fn compile(config: &CompileConfig) -> CompileResult {
    let output_dir = config.output_directory();
    let mut result = CompileResult::new(output_dir.clone());

    if let Err(err) = run(config, &output_dir, &mut result) {
        warn!(error = %format!("{err:#}"), "plugin compilation failed");
        result.generic_failure = true;
    }

    // The two cleanup decisions are independent; both fire on generic
    // failure regardless of what the flags say.
    if config.clear_temporary_files_when_done || result.generic_failure {
        try_remove_directory(&config.reference_temp_directory());
    }
    if config.delete_output_files_when_done || result.generic_failure {
        try_remove_directory(&output_dir);
        result.output_files.clear();
    }

    result
}

fn run(config: &CompileConfig, output_dir: &Path, result: &mut CompileResult) -> Result<()> {
    if config.source_files.is_empty() {
        return Ok(());
    }

    let references = refs::resolve_references(config)?;

    // Stale outputs from a previous call would feed the collision-avoidance
    // naming and produce needlessly suffixed names, so start clean.
    if output_dir.exists() {
        fs::remove_dir_all(output_dir).with_context(|| {
            format!("failed to clear output directory {}", output_dir.display())
        })?;
    }
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

    if config.single_unit_output {
        // One invocation over a generated root that pulls in every source.
        let root = write_merged_root(&config.source_files)?;
        run_invocation(
            MERGED_UNIT_NAME,
            root.path(),
            &references,
            output_dir,
            config,
            result,
        )?;
    } else {
        for source in &config.source_files {
            let base = invoker::unit_base_name(output_dir, source);
            run_invocation(&base, source, &references, output_dir, config, result)?;
        }
    }

    Ok(())
}

/// One toolchain invocation plus provenance for its unit. A compile failure
/// (error diagnostics) leaves no unit but is not an `Err`; remaining
/// invocations in per-source mode still run.
fn run_invocation(
    base_name: &str,
    root_source: &Path,
    references: &[PathBuf],
    output_dir: &Path,
    config: &CompileConfig,
    result: &mut CompileResult,
) -> Result<()> {
    let invocation = invoker::invoke(base_name, root_source, references, output_dir)?;
    result.diagnostics.extend(invocation.diagnostics);
    let Some(unit) = invocation.unit else {
        return Ok(());
    };
    result.output_files.push(unit.binary_path.clone());
    result.output_files.push(unit.symbol_path.clone());
    resolve_provenance(&unit, &config.user_files_root, result);
    result.units.push(unit);
    Ok(())
}

/// Best-effort: a unit whose debug information cannot be read keeps its
/// compiled unit but gets no provenance entries at all; a type whose own
/// resolution failed gets an empty entry.
fn resolve_provenance(unit: &CompiledUnit, user_files_root: &Path, result: &mut CompileResult) {
    let resolver = DwarfResolver::for_unit(unit);
    match resolver.defining_sources() {
        Ok(types) => {
            for entry in types {
                let relative = entry
                    .source_path
                    .as_deref()
                    .and_then(|path| provenance::relativize(path, user_files_root))
                    .unwrap_or_default();
                if relative.is_empty() {
                    debug!(type_name = %entry.type_name, "no provenance recovered for plugin type");
                }
                result.provenance.insert(entry.type_name, relative);
            }
        }
        Err(err) => {
            debug!(unit = %unit.name, error = %err, "provenance resolution failed for unit");
        }
    }
}

/// Generate the root source for merged-output mode: one `#[path]` module
/// declaration per source file, stems deduplicated with a counter.
fn write_merged_root(sources: &[PathBuf]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("plugforge_merged_root")
        .suffix(".rs")
        .tempfile()
        .context("failed to create merged root source")?;

    let mut seen: HashMap<String, u32> = HashMap::new();
    for source in sources {
        let absolute = absolutize(source);
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = invoker::sanitize_crate_name(&stem);
        let count = seen.entry(base.clone()).or_insert(0);
        let module = if *count == 0 {
            base.clone()
        } else {
            format!("{base}{count}")
        };
        *count += 1;
        writeln!(
            file,
            "#[path = \"{}\"]\npub mod {module};",
            absolute.to_string_lossy().escape_default()
        )
        .context("failed to write merged root source")?;
    }
    file.flush().context("failed to flush merged root source")?;
    Ok(file)
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Delete a directory tree, swallowing errors. Returns whether the directory
/// is gone afterwards.
pub(crate) fn try_remove_directory(dir: &Path) -> bool {
    if !dir.exists() {
        return true;
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => true,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "failed to remove directory");
            false
        }
    }
}
