//! Recovers which source file defined each compiled plugin type.
//!
//! A loaded library cannot answer "what file was this type written in";
//! textual source location is debug metadata, not type metadata. This module
//! re-parses the just-compiled binary together with its DWARF debug
//! information: each exported plugin constructor (`__plugforge_plugin_ctor__*`
//! symbol) pins an address range, the line program maps the first instruction
//! in that range back to a source document, and the `DW_TAG_namespace` chain
//! around the type's DIE yields its fully qualified name.
//!
//! Everything here is best-effort metadata recovery. A type whose source
//! cannot be recovered stays fully usable; it only loses its persistent-state
//! key downstream.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use gimli::{AttributeValue, Dwarf, EndianSlice, RunTimeEndian};
use object::{Object, ObjectSection, ObjectSymbol};
use thiserror::Error;
use tracing::debug;

use crate::result::CompiledUnit;
use crate::PLUGIN_CTOR_PREFIX;

type Reader<'i> = EndianSlice<'i, RunTimeEndian>;

/// Errors from the binary/DWARF parsing boundary. Callers above this module
/// swallow these per unit; they never fail a compile call.
#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("failed to parse compiled unit: {0}")]
    Object(#[from] object::Error),
    #[error("failed to read debug information: {0}")]
    Dwarf(#[from] gimli::Error),
    #[error("failed to read symbol file: {0}")]
    Io(#[from] std::io::Error),
    #[error("compiled unit carries no debug information")]
    MissingDebugInfo,
}

/// One plugin type found in a compiled unit.
#[derive(Clone, Debug)]
pub struct TypeSource {
    /// Fully qualified type name (`crate::module::Type`).
    pub type_name: String,
    /// Absolute path of the defining source file, when recoverable.
    pub source_path: Option<PathBuf>,
}

/// Narrow seam between orchestration and the debug-information format, so a
/// different symbol reader can be swapped in per target platform.
pub trait SourceResolver {
    /// Lists every plugin type in the unit with its defining source file.
    /// Every plugin type gets an entry; a type whose resolution failed gets
    /// `source_path: None` rather than being dropped.
    fn defining_sources(&self) -> Result<Vec<TypeSource>, ProvenanceError>;
}

/// [`SourceResolver`] backed by the unit's own DWARF sections, falling back
/// to the side-car symbol file when the binary carries none.
pub struct DwarfResolver<'a> {
    image: &'a [u8],
    symbol_path: Option<&'a Path>,
}

impl<'a> DwarfResolver<'a> {
    pub fn new(image: &'a [u8]) -> Self {
        Self {
            image,
            symbol_path: None,
        }
    }

    /// Resolver for a freshly compiled unit, working from the in-memory
    /// image already at hand and the unit's symbol file as fallback.
    pub fn for_unit(unit: &'a CompiledUnit) -> Self {
        Self {
            image: &unit.image,
            symbol_path: Some(&unit.symbol_path),
        }
    }
}

impl SourceResolver for DwarfResolver<'_> {
    fn defining_sources(&self) -> Result<Vec<TypeSource>, ProvenanceError> {
        let obj = object::File::parse(self.image)?;
        let ctors = plugin_ctors(&obj);
        if ctors.is_empty() {
            return Ok(Vec::new());
        }

        let endian = if obj.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        // Prefer the DWARF baked into the binary; fall back to the side-car
        // symbol file, whose section bytes are verbatim copies so addresses
        // still line up with the binary's symbol table.
        let sidecar_bytes;
        let sidecar_obj;
        let dwarf_source: &object::File = if has_debug_info(&obj) {
            &obj
        } else if let Some(path) = self.symbol_path {
            sidecar_bytes = fs::read(path)?;
            sidecar_obj = object::File::parse(sidecar_bytes.as_slice())?;
            if !has_debug_info(&sidecar_obj) {
                return Err(ProvenanceError::MissingDebugInfo);
            }
            &sidecar_obj
        } else {
            return Err(ProvenanceError::MissingDebugInfo);
        };

        let dwarf_cow = Dwarf::load(|id| -> Result<Cow<'_, [u8]>, gimli::Error> {
            Ok(dwarf_source
                .section_by_name(id.name())
                .and_then(|s| s.uncompressed_data().ok())
                .unwrap_or(Cow::Borrowed(&[][..])))
        })?;
        let dwarf = dwarf_cow.borrow(|section| EndianSlice::new(section, endian));

        let mut out = Vec::with_capacity(ctors.len());
        for ctor in &ctors {
            // One type's resolution failure never aborts its siblings.
            match resolve_one(&dwarf, ctor) {
                Ok(type_source) => out.push(type_source),
                Err(err) => {
                    debug!(type_ident = %ctor.ident, error = %err, "type provenance resolution failed");
                    out.push(TypeSource {
                        type_name: ctor.ident.clone(),
                        source_path: None,
                    });
                }
            }
        }
        Ok(out)
    }
}

/// A plugin constructor symbol exported by the compiled unit.
struct PluginCtor {
    /// Type identifier, taken from the symbol name after the prefix.
    ident: String,
    address: u64,
    size: u64,
}

fn plugin_ctors(obj: &object::File) -> Vec<PluginCtor> {
    let mut by_ident: HashMap<String, PluginCtor> = HashMap::new();
    for sym in obj.symbols().chain(obj.dynamic_symbols()) {
        let Ok(name) = sym.name() else {
            continue;
        };
        let Some(ident) = name.strip_prefix(PLUGIN_CTOR_PREFIX) else {
            continue;
        };
        if ident.is_empty() || sym.address() == 0 {
            continue;
        }
        by_ident.entry(ident.to_string()).or_insert(PluginCtor {
            ident: ident.to_string(),
            address: sym.address(),
            size: sym.size(),
        });
    }
    let mut ctors: Vec<_> = by_ident.into_values().collect();
    ctors.sort_by_key(|c| c.address);
    ctors
}

fn has_debug_info(obj: &object::File) -> bool {
    obj.section_by_name(".debug_info")
        .or_else(|| obj.section_by_name("__debug_info"))
        .map_or(false, |s| s.size() > 0)
}

fn resolve_one(
    dwarf: &Dwarf<Reader<'_>>,
    ctor: &PluginCtor,
) -> Result<TypeSource, gimli::Error> {
    let range_end = if ctor.size == 0 {
        ctor.address + 1
    } else {
        ctor.address + ctor.size
    };

    // First sequence point inside the constructor's address range.
    let mut source_path = ctor_line_source(dwarf, ctor.address, range_end)?;

    // The type DIE gives the namespace chain; its decl_file doubles as a
    // fallback source when the line program had no usable row.
    let (type_name, decl_source) = match type_die_info(dwarf, &ctor.ident)? {
        Some((name, decl)) => (name, decl),
        None => (ctor.ident.clone(), None),
    };
    if source_path.is_none() {
        source_path = decl_source;
    }

    Ok(TypeSource {
        type_name,
        source_path,
    })
}

/// Scan line-program rows for the first one whose address falls inside
/// `[lo, hi)` and whose document has a non-empty path.
fn ctor_line_source(
    dwarf: &Dwarf<Reader<'_>>,
    lo: u64,
    hi: u64,
) -> Result<Option<PathBuf>, gimli::Error> {
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let Some(program) = unit.line_program.clone() else {
            continue;
        };
        let mut rows = program.rows();
        while let Some((header, row)) = rows.next_row()? {
            if row.end_sequence() || row.address() < lo || row.address() >= hi {
                continue;
            }
            if let Some(path) = file_entry_path(dwarf, &unit, header, row.file_index()) {
                return Ok(Some(path));
            }
        }
    }
    Ok(None)
}

/// Find the type DIE named `ident` and return its fully qualified name
/// (enclosing `DW_TAG_namespace` chain) plus its `DW_AT_decl_file` path.
fn type_die_info(
    dwarf: &Dwarf<Reader<'_>>,
    ident: &str,
) -> Result<Option<(String, Option<PathBuf>)>, gimli::Error> {
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let mut depth = 0isize;
        let mut namespaces: Vec<(isize, String)> = Vec::new();
        let mut entries = unit.entries();
        while let Some((delta, entry)) = entries.next_dfs()? {
            depth += delta;
            namespaces.retain(|(d, _)| *d < depth);
            match entry.tag() {
                gimli::DW_TAG_namespace => {
                    if let Some(name) = die_name(dwarf, &unit, entry)? {
                        namespaces.push((depth, name));
                    }
                }
                gimli::DW_TAG_structure_type
                | gimli::DW_TAG_enumeration_type
                | gimli::DW_TAG_union_type => {
                    if die_name(dwarf, &unit, entry)?.as_deref() != Some(ident) {
                        continue;
                    }
                    let mut qualified: Vec<&str> =
                        namespaces.iter().map(|(_, n)| n.as_str()).collect();
                    qualified.push(ident);
                    let decl = decl_file_path(dwarf, &unit, entry)?;
                    return Ok(Some((qualified.join("::"), decl)));
                }
                _ => {}
            }
        }
    }
    Ok(None)
}

fn die_name(
    dwarf: &Dwarf<Reader<'_>>,
    unit: &gimli::Unit<Reader<'_>>,
    entry: &gimli::DebuggingInformationEntry<Reader<'_>>,
) -> Result<Option<String>, gimli::Error> {
    let Some(value) = entry.attr_value(gimli::DW_AT_name)? else {
        return Ok(None);
    };
    let name = dwarf.attr_string(unit, value)?;
    Ok(Some(name.to_string_lossy().into_owned()))
}

fn decl_file_path(
    dwarf: &Dwarf<Reader<'_>>,
    unit: &gimli::Unit<Reader<'_>>,
    entry: &gimli::DebuggingInformationEntry<Reader<'_>>,
) -> Result<Option<PathBuf>, gimli::Error> {
    let Some(value) = entry.attr_value(gimli::DW_AT_decl_file)? else {
        return Ok(None);
    };
    let index = match value {
        AttributeValue::FileIndex(index) => index,
        AttributeValue::Udata(index) => index,
        _ => return Ok(None),
    };
    let Some(program) = unit.line_program.as_ref() else {
        return Ok(None);
    };
    Ok(file_entry_path(dwarf, unit, program.header(), index))
}

/// Reassemble the path of line-program file entry `index`: compilation
/// directory, then the entry's directory, then its file name. Pushing an
/// absolute component onto a `PathBuf` replaces what came before, which is
/// exactly the DWARF path-composition rule.
fn file_entry_path(
    dwarf: &Dwarf<Reader<'_>>,
    unit: &gimli::Unit<Reader<'_>>,
    header: &gimli::LineProgramHeader<Reader<'_>>,
    index: u64,
) -> Option<PathBuf> {
    let file = header.file(index)?;
    let mut path = PathBuf::new();
    if let Some(comp_dir) = &unit.comp_dir {
        path.push(comp_dir.to_string_lossy().into_owned());
    }
    if let Some(dir) = file.directory(header) {
        let dir = dwarf.attr_string(unit, dir).ok()?;
        path.push(dir.to_string_lossy().into_owned());
    }
    let name = dwarf.attr_string(unit, file.path_name()).ok()?;
    let name = name.to_string_lossy();
    if name.is_empty() {
        return None;
    }
    path.push(name.into_owned());
    Some(path)
}

/// Compute a source file's path relative to `root` the tolerant way: both
/// sides absolutized, lower-cased, separator-normalized; if the root occurs
/// as a substring of the source path, the relative path is everything after
/// it with leading separators trimmed. `None` means the source lies outside
/// the root.
pub(crate) fn relativize(source: &Path, root: &Path) -> Option<String> {
    let source = normalize(source);
    let root = normalize(root);
    if root.is_empty() {
        return None;
    }
    let spot = source.find(&root)?;
    let rel = source[spot + root.len()..].trim_start_matches(['/', '\\']);
    if rel.is_empty() {
        None
    } else {
        Some(rel.to_string())
    }
}

fn normalize(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute
        .to_string_lossy()
        .replace('\\', "/")
        .to_lowercase()
}
