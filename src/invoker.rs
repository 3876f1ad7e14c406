//! Drives one `rustc` invocation per compiled unit.
//!
//! Every invocation produces a dynamic library (never an executable) with
//! full debug information, plus a side-car symbol file holding only the
//! `.debug_*` sections, written next to the binary. Warnings are never fatal;
//! structured diagnostics are captured from rustc's JSON stderr stream.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use libloading::library_filename;
use object::{Object, ObjectSection};
use tracing::debug;

use crate::diagnostics::{parse_rustc_diagnostics, Diagnostic};
use crate::result::CompiledUnit;

/// Outcome of one toolchain invocation. `unit` is `None` when the invocation
/// reported error diagnostics or exited non-zero; the diagnostics list is
/// populated either way.
pub(crate) struct Invocation {
    pub unit: Option<CompiledUnit>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Compile `root_source` into `<output_dir>/lib<base_name>.<ext>` with a
/// matching `.dwarf` side-car.
pub(crate) fn invoke(
    base_name: &str,
    root_source: &Path,
    references: &[PathBuf],
    output_dir: &Path,
) -> Result<Invocation> {
    let mut args: Vec<String> = vec![
        "--edition".into(),
        "2021".into(),
        "--crate-type".into(),
        "cdylib".into(),
        "--crate-name".into(),
        base_name.into(),
        "-C".into(),
        "debuginfo=2".into(),
        "-C".into(),
        "opt-level=2".into(),
        "--error-format".into(),
        "json".into(),
        "--out-dir".into(),
        output_dir.display().to_string(),
    ];
    for reference in references {
        if let Some(parent) = reference.parent() {
            args.push("-L".into());
            args.push(parent.display().to_string());
        }
        args.push("--extern".into());
        args.push(format!(
            "{}={}",
            reference_extern_name(reference),
            reference.display()
        ));
    }
    args.push(root_source.display().to_string());

    debug!(unit = base_name, source = %root_source.display(), "invoking rustc");
    let output = duct::cmd("rustc", &args)
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .context("failed to spawn rustc")?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut diagnostics = parse_rustc_diagnostics(&stderr);
    let failed = !output.status.success() || diagnostics.iter().any(Diagnostic::is_error);
    if !output.status.success() && diagnostics.is_empty() {
        // rustc died without emitting JSON diagnostics (bad flags, ICE).
        diagnostics.push(Diagnostic::error(format!(
            "rustc exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    if failed {
        return Ok(Invocation {
            unit: None,
            diagnostics,
        });
    }

    let binary_path = output_dir.join(library_filename(base_name));
    let image = fs::read(&binary_path).with_context(|| {
        format!(
            "compiled library missing at {} after successful invocation",
            binary_path.display()
        )
    })?;
    let symbol_path = binary_path.with_extension("dwarf");
    write_symbol_sidecar(&image, &symbol_path)?;

    Ok(Invocation {
        unit: Some(CompiledUnit {
            name: base_name.to_string(),
            binary_path,
            symbol_path,
            image,
        }),
        diagnostics,
    })
}

/// Pick a collision-free unit base name for a source file: the sanitized file
/// stem, with an incrementing integer suffix (starting at 1) whenever the
/// corresponding library file already exists in the output directory. Earlier
/// invocations of the same call write files this check observes, so two
/// same-stem sources never silently overwrite each other.
pub(crate) fn unit_base_name(output_dir: &Path, source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = sanitize_crate_name(&stem);
    let mut candidate = base.clone();
    let mut shift = 0u32;
    while output_dir.join(library_filename(&candidate)).exists() {
        shift += 1;
        candidate = format!("{base}{shift}");
    }
    candidate
}

/// Turn an arbitrary file stem into a valid crate identifier.
pub(crate) fn sanitize_crate_name(stem: &str) -> String {
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() || name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// `--extern` key for a reference path: the file stem with any `lib` prefix
/// stripped, sanitized to an identifier.
fn reference_extern_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.strip_prefix("lib").unwrap_or(&stem);
    sanitize_crate_name(stem)
}

/// Write a bare object file containing only the binary's `.debug_*` sections,
/// the in-process equivalent of `objcopy --only-keep-debug`. Section bytes
/// are copied verbatim, so addresses inside the DWARF still refer to the
/// binary's layout.
fn write_symbol_sidecar(image: &[u8], symbol_path: &Path) -> Result<()> {
    let obj = object::File::parse(image).context("failed to parse compiled library")?;
    let mut out = object::write::Object::new(obj.format(), obj.architecture(), obj.endianness());
    for section in obj.sections() {
        let Ok(name) = section.name() else {
            continue;
        };
        if !name.starts_with(".debug_") && !name.starts_with("__debug_") {
            continue;
        }
        let data = section
            .uncompressed_data()
            .with_context(|| format!("failed to read section {name}"))?;
        let id = out.add_section(
            Vec::new(),
            name.as_bytes().to_vec(),
            object::SectionKind::Debug,
        );
        out.section_mut(id)
            .set_data(data.into_owned(), section.align().max(1));
    }
    let bytes = out
        .write()
        .context("failed to serialize symbol side-car")?;
    fs::write(symbol_path, bytes)
        .with_context(|| format!("failed to write symbol file {}", symbol_path.display()))
}
