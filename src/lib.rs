//! Runtime compilation of user plugin sources into loadable libraries.
//!
//! `plugforge` drives `rustc` over plugin source files, producing one merged
//! dynamic library or one per source, and then reads the compiled unit's
//! DWARF debug information to recover which source file defined each
//! plugin type. The recovered path, relative to a configured root, is the
//! stable key a separate persistence layer uses to address per-plugin state.
//!
//! The one entry point is [`compile`]; it always returns a [`CompileResult`],
//! never an error. Loading the compiled libraries is the caller's job.

pub mod compile;
pub mod config;
pub mod diagnostics;
pub mod invoker;
pub mod provenance;
pub mod refs;
pub mod result;

pub use compile::compile;
pub use config::CompileConfig;
pub use diagnostics::{Diagnostic, Severity};
pub use provenance::{DwarfResolver, ProvenanceError, SourceResolver, TypeSource};
pub use result::{CompileResult, CompiledUnit};

/// Default directory in-memory references are materialized into.
pub const DEFAULT_REFERENCE_TEMP_DIR: &str = ".plugforge_compile_temp";

/// Default directory compiled libraries and their symbol files land in.
pub const DEFAULT_OUTPUT_DIR: &str = ".plugforge_compile_output";

/// Base name of the single unit produced in merged-output mode.
pub const MERGED_UNIT_NAME: &str = "plugforge_merged";

/// Exported-symbol prefix that marks a plugin constructor. The plugin SDK
/// emits one `#[no_mangle]` constructor per plugin type, named by appending
/// the type's identifier to this prefix; provenance resolution keys off it.
pub const PLUGIN_CTOR_PREFIX: &str = "__plugforge_plugin_ctor__";
