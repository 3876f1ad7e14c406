use std::path::PathBuf;

/// Immutable input for one call to [`crate::compile`].
///
/// Exactly one of `reuse_materialized_references` or `references_in_memory`
/// governs reference materialization for a given call: when reuse is set, the
/// in-memory buffers are ignored and whatever already sits in the reference
/// temp directory is passed to the toolchain unchanged.
#[derive(Clone, Debug, Default)]
pub struct CompileConfig {
    /// Plugin source files to compile, in order.
    pub source_files: Vec<PathBuf>,

    /// Compiled reference libraries already on disk (`.rlib`/`.so`), passed to
    /// the toolchain as `--extern` entries keyed by file stem.
    pub references_on_disk: Vec<PathBuf>,

    /// Reference library images held in memory; materialized to numbered
    /// files in the reference temp directory before invocation.
    pub references_in_memory: Vec<Vec<u8>>,

    /// Capability libraries the host wants every plugin compiled against,
    /// supplied explicitly rather than scraped from the running process.
    pub capability_modules: Vec<PathBuf>,

    /// Compile all sources into one merged unit instead of one unit per file.
    pub single_unit_output: bool,

    /// Skip materialization and reuse whatever files are already present in
    /// the reference temp directory. No staleness check is performed; the
    /// caller must know the directory's contents match this call.
    pub reuse_materialized_references: bool,

    /// Root directory against which recovered source paths are relativized.
    pub user_files_root: PathBuf,

    /// Where compiled binaries and their symbol files land. Defaults to
    /// [`crate::DEFAULT_OUTPUT_DIR`].
    pub output_directory: Option<PathBuf>,

    /// Where in-memory references are materialized. Defaults to
    /// [`crate::DEFAULT_REFERENCE_TEMP_DIR`]. Callers running compilations
    /// concurrently should supply distinct directories per call.
    pub reference_temp_directory: Option<PathBuf>,

    /// Recursively delete the reference temp directory once the call returns.
    pub clear_temporary_files_when_done: bool,

    /// Recursively delete the output directory once the call returns and
    /// clear the result's output-file list.
    pub delete_output_files_when_done: bool,
}

impl CompileConfig {
    pub fn output_directory(&self) -> PathBuf {
        self.output_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(crate::DEFAULT_OUTPUT_DIR))
    }

    pub fn reference_temp_directory(&self) -> PathBuf {
        self.reference_temp_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(crate::DEFAULT_REFERENCE_TEMP_DIR))
    }
}
