use std::collections::HashMap;
use std::path::PathBuf;

use crate::diagnostics::Diagnostic;

/// One loadable library produced by a single toolchain invocation.
///
/// The binary image is kept in memory so the caller can hand it straight to
/// its loader and so provenance resolution avoids a redundant disk read.
#[derive(Clone, Debug)]
pub struct CompiledUnit {
    /// Collision-free base name the output files were derived from.
    pub name: String,
    /// Path of the compiled dynamic library on disk.
    pub binary_path: PathBuf,
    /// Path of the matching debug-symbol side-car file.
    pub symbol_path: PathBuf,
    /// The binary image as written to `binary_path`.
    pub image: Vec<u8>,
}

/// Everything one call to [`crate::compile`] produced.
///
/// `compile` always returns a value, never an error: callers must check
/// `generic_failure` before trusting any other field, and on failure treat
/// everything produced by the call as discarded.
#[derive(Debug, Default)]
pub struct CompileResult {
    /// Successfully compiled units. Failed invocations leave no entry here.
    pub units: Vec<CompiledUnit>,
    /// Diagnostics accumulated across all invocations of the call.
    pub diagnostics: Vec<Diagnostic>,
    /// Set when an error escaped orchestration rather than surfacing as
    /// diagnostics; forces cleanup of temp and output artifacts.
    pub generic_failure: bool,
    /// Fully-qualified plugin type name -> source path relative to the
    /// configured root. Empty string means resolution was attempted and
    /// failed; such a plugin runs fine but gets no persistent-state key.
    pub provenance: HashMap<String, String>,
    /// Output files actually written to disk (binaries and symbol files).
    pub output_files: Vec<PathBuf>,
    /// The resolved output directory containing `output_files`.
    pub output_directory: PathBuf,
}

impl CompileResult {
    pub(crate) fn new(output_directory: PathBuf) -> Self {
        Self {
            output_directory,
            ..Self::default()
        }
    }

    /// True when at least one diagnostic has error severity.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.is_error())
    }
}
