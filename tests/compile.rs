//! End-to-end tests driving the real `rustc` toolchain over small plugin
//! sources in scoped temp directories.

use std::fs;
use std::path::{Path, PathBuf};

use plugforge::{compile, CompileConfig};

/// Config with all shared directories scoped under `root` so tests never
/// race on the process-wide defaults.
fn scoped_config(root: &Path) -> CompileConfig {
    CompileConfig {
        user_files_root: root.to_path_buf(),
        output_directory: Some(root.join("out")),
        reference_temp_directory: Some(root.join("ref_temp")),
        ..CompileConfig::default()
    }
}

/// A minimal plugin source: one type plus its exported constructor, the
/// contract provenance resolution keys off.
fn plugin_source(type_ident: &str) -> String {
    format!(
        r#"pub struct {t} {{
    ticks: u64,
}}

impl {t} {{
    fn new() -> Self {{
        Self {{ ticks: 0 }}
    }}

    pub fn tick(&mut self) -> u64 {{
        self.ticks += 1;
        self.ticks
    }}
}}

#[allow(non_snake_case)]
#[no_mangle]
pub extern "C" fn __plugforge_plugin_ctor__{t}() -> *mut {t} {{
    Box::into_raw(Box::new({t}::new()))
}}
"#,
        t = type_ident
    )
}

fn write_source(path: &Path, contents: &str) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
    path.to_path_buf()
}

#[test]
fn zero_sources_yields_clean_empty_result() {
    let dir = tempfile::tempdir().unwrap();
    let config = scoped_config(dir.path());

    let result = compile(&config);

    assert!(!result.generic_failure);
    assert!(result.units.is_empty());
    assert!(result.diagnostics.is_empty());
    assert!(result.provenance.is_empty());
    assert!(result.output_files.is_empty());
}

#[test]
fn parse_failure_surfaces_error_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir.path().join("plugins/bad.rs"), "pub fn broken( {\n");
    let mut config = scoped_config(dir.path());
    config.source_files = vec![source];

    let result = compile(&config);

    assert!(!result.generic_failure);
    assert!(result.units.is_empty());
    assert!(!result.diagnostics.is_empty());
    assert!(result.diagnostics.iter().any(|d| d.is_error()));
}

#[test]
fn clean_plugin_resolves_provenance() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(
        &dir.path().join("plugins/hello_plugin.rs"),
        &plugin_source("HelloPlugin"),
    );
    let mut config = scoped_config(dir.path());
    config.source_files = vec![source];

    let result = compile(&config);

    assert!(!result.generic_failure);
    assert!(result.diagnostics.is_empty());
    assert_eq!(result.units.len(), 1);
    let unit = &result.units[0];
    assert_eq!(unit.name, "hello_plugin");
    assert!(unit.binary_path.exists());
    assert!(unit.symbol_path.exists());
    assert!(!unit.image.is_empty());

    assert_eq!(result.provenance.len(), 1);
    let relative = result
        .provenance
        .get("hello_plugin::HelloPlugin")
        .expect("provenance keyed by fully qualified type name");
    assert_eq!(relative, "plugins/hello_plugin.rs");
}

#[test]
fn warnings_do_not_fail_compilation() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(
        &dir.path().join("plugins/warny.rs"),
        "pub fn used() {}\n\nfn helper() {}\n",
    );
    let mut config = scoped_config(dir.path());
    config.source_files = vec![source];

    let result = compile(&config);

    assert!(!result.generic_failure);
    assert_eq!(result.units.len(), 1);
    assert!(!result.diagnostics.is_empty());
    assert!(result.diagnostics.iter().all(|d| !d.is_error()));
}

#[test]
fn same_stem_sources_get_distinct_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_source(&dir.path().join("a/tool.rs"), "pub fn alpha() {}\n");
    let second = write_source(&dir.path().join("b/tool.rs"), "pub fn beta() {}\n");
    let mut config = scoped_config(dir.path());
    config.source_files = vec![first, second];

    let result = compile(&config);

    assert!(!result.generic_failure);
    assert_eq!(result.units.len(), 2);
    assert_eq!(result.units[0].name, "tool");
    assert_eq!(result.units[1].name, "tool1");
    assert!(result.units[0].binary_path.exists());
    assert!(result.units[1].binary_path.exists());
    assert_ne!(result.units[0].binary_path, result.units[1].binary_path);
}

#[test]
fn merged_mode_produces_one_unit_with_all_provenance() {
    let dir = tempfile::tempdir().unwrap();
    let hello = write_source(
        &dir.path().join("plugins/hello.rs"),
        &plugin_source("HelloPlugin"),
    );
    let goodbye = write_source(
        &dir.path().join("plugins/goodbye.rs"),
        &plugin_source("GoodbyePlugin"),
    );
    let mut config = scoped_config(dir.path());
    config.source_files = vec![hello, goodbye];
    config.single_unit_output = true;

    let result = compile(&config);

    assert!(!result.generic_failure);
    assert_eq!(result.units.len(), 1);
    assert_eq!(result.units[0].name, "plugforge_merged");
    assert_eq!(result.provenance.len(), 2);

    let hello_entry = result
        .provenance
        .iter()
        .find(|(name, _)| name.ends_with("::HelloPlugin"))
        .expect("merged unit resolves HelloPlugin");
    assert_eq!(hello_entry.1, "plugins/hello.rs");
    let goodbye_entry = result
        .provenance
        .iter()
        .find(|(name, _)| name.ends_with("::GoodbyePlugin"))
        .expect("merged unit resolves GoodbyePlugin");
    assert_eq!(goodbye_entry.1, "plugins/goodbye.rs");
}

#[test]
fn rerunning_with_fresh_materialization_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir.path().join("plugins/simple.rs"), "pub fn go() {}\n");
    let mut config = scoped_config(dir.path());
    config.source_files = vec![source];
    config.references_in_memory = vec![b"not a real library".to_vec()];

    let first = compile(&config);
    assert!(!first.generic_failure);
    assert!(config
        .reference_temp_directory
        .as_ref()
        .unwrap()
        .join("ref_asm0.rlib")
        .exists());

    // Temp directory already exists from the first run; files are simply
    // rewritten by index.
    let second = compile(&config);
    assert!(!second.generic_failure);
    assert_eq!(second.units.len(), 1);
}

#[test]
fn delete_output_files_when_done_removes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir.path().join("plugins/simple.rs"), "pub fn go() {}\n");
    let mut config = scoped_config(dir.path());
    config.source_files = vec![source];
    config.delete_output_files_when_done = true;

    let result = compile(&config);

    assert!(!result.generic_failure);
    assert_eq!(result.units.len(), 1);
    assert!(result.output_files.is_empty());
    assert!(!dir.path().join("out").exists());
}

#[test]
fn generic_failure_forces_cleanup_of_both_directories() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir.path().join("plugins/simple.rs"), "pub fn go() {}\n");
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"in the way").unwrap();

    let mut config = scoped_config(dir.path());
    config.source_files = vec![source];
    config.references_in_memory = vec![vec![0u8; 16]];
    // A file where the output directory's parent should be makes directory
    // creation fail after references have been materialized.
    config.output_directory = Some(blocker.join("out"));
    config.clear_temporary_files_when_done = false;
    config.delete_output_files_when_done = false;

    let result = compile(&config);

    assert!(result.generic_failure);
    assert!(result.units.is_empty());
    assert!(result.output_files.is_empty());
    assert!(!dir.path().join("ref_temp").exists());
    assert!(!blocker.join("out").exists());
}
