//! Symbol table editing.
//!
//! Removes or weakens named symbols in place. Table addresses are always
//! computed relative to the `__LINKEDIT` segment's mapped base, never as raw
//! file offsets: `linkedit_base + (table_offset - linkedit_fileoff)`.

use crate::error::{Error, Result};
use crate::macho::commands::LoadCommandIter;
use crate::macho::types::*;
use crate::macho::utils::read_cstr;
use tracing::{debug, warn};

struct SymbolTables {
    symtab: SymtabCommand,
    /// Command offset and decoded dysymtab, when the slice carries one.
    /// Only undefined-symbol removal needs it; weakening does not.
    dysymtab: Option<(usize, DysymtabCommand)>,
    /// Absolute offset of the symbol table in the mapping.
    symbols: usize,
    /// Absolute offset of the string table in the mapping.
    strings: usize,
}

/// Locates the symbol machinery of the slice at `slice_offset`.
///
/// Returns `None` when the symtab or `__LINKEDIT` segment is absent;
/// callers treat that as a logged no-op rather than a hard error. A missing
/// dysymtab is recorded as `None` so operations that do not need it still
/// proceed.
fn locate_tables(data: &[u8], slice_offset: usize) -> Result<Option<SymbolTables>> {
    let mut symtab: Option<SymtabCommand> = None;
    let mut dysymtab: Option<(usize, DysymtabCommand)> = None;
    let mut linkedit: Option<SegmentCommand64> = None;

    for item in LoadCommandIter::from_slice(data, slice_offset)? {
        let cmd = item?;
        match cmd.cmd {
            LC_SYMTAB => symtab = Some(SymtabCommand::decode(data, cmd.offset)?),
            LC_DYSYMTAB => {
                dysymtab = Some((cmd.offset, DysymtabCommand::decode(data, cmd.offset)?))
            }
            LC_SEGMENT_64 => {
                let seg = SegmentCommand64::decode(data, cmd.offset)?;
                if seg.name() == SEG_LINKEDIT {
                    linkedit = Some(seg);
                }
            }
            _ => {}
        }
    }

    let (symtab, linkedit) = match (symtab, linkedit) {
        (Some(s), Some(l)) => (s, l),
        _ => return Ok(None),
    };

    let linkedit_base = slice_offset + linkedit.fileoff as usize;
    let symbols = linkedit_relative(linkedit_base, linkedit.fileoff, symtab.symoff)?;
    let strings = linkedit_relative(linkedit_base, linkedit.fileoff, symtab.stroff)?;

    Ok(Some(SymbolTables {
        symtab,
        dysymtab,
        symbols,
        strings,
    }))
}

/// Maps a table file offset into the mapping through the `__LINKEDIT`
/// segment's base. A table offset below the segment's file offset is
/// malformed input, not a panic.
fn linkedit_relative(
    linkedit_base: usize,
    linkedit_fileoff: u64,
    table_offset: u32,
) -> Result<usize> {
    let delta = u64::from(table_offset)
        .checked_sub(linkedit_fileoff)
        .ok_or_else(|| Error::MalformedCommand {
            offset: table_offset as usize,
            message: format!(
                "table offset {:#x} precedes __LINKEDIT fileoff {:#x}",
                table_offset, linkedit_fileoff
            ),
        })?;
    Ok(linkedit_base + delta as usize)
}

/// Zeroes out undefined symbols whose names appear in `names`, decrementing
/// the dynamic symbol table's undefined count by the number removed.
///
/// Only the undefined sub-range declared by the dysymtab command is visited.
/// Missing symbol machinery is a non-fatal no-op returning `Ok(0)`.
pub fn remove_undefined_symbols(
    data: &mut [u8],
    slice_offset: usize,
    names: &[&str],
) -> Result<u32> {
    let tables = match locate_tables(data, slice_offset)? {
        Some(t) => t,
        None => {
            warn!("Could not find required symbol table commands");
            return Ok(0);
        }
    };
    let (dysymtab_offset, dysymtab) = match tables.dysymtab {
        Some(t) => t,
        None => {
            warn!("Could not find dynamic symbol table command");
            return Ok(0);
        }
    };

    let mut removed = 0u32;
    for i in 0..dysymtab.nundefsym as usize {
        let index = dysymtab.iundefsym as usize + i;
        let offset = tables.symbols + index * NLIST_64_SIZE;
        let sym = Nlist64::decode(data, offset)?;
        let name = read_cstr(data, tables.strings + sym.n_strx as usize)?;

        if names.contains(&name.as_str()) {
            debug!(symbol = %name, "Removing undefined symbol");
            Nlist64::default().encode_at(data, offset)?;
            removed += 1;
        }
    }

    if removed > 0 {
        DysymtabCommand::write_nundefsym(data, dysymtab_offset, dysymtab.nundefsym - removed)?;
        debug!(removed, "Undefined symbol count updated");
    }

    Ok(removed)
}

/// Sets the weak-definition bit on every symbol whose name appears in
/// `names`, across the entire symbol table. Other fields are untouched.
///
/// Needs only the symtab and `__LINKEDIT`; a missing dysymtab does not stop
/// weakening. A missing symtab or `__LINKEDIT` is a non-fatal no-op
/// returning `Ok(0)`.
pub fn weaken_symbols(data: &mut [u8], slice_offset: usize, names: &[&str]) -> Result<u32> {
    let tables = match locate_tables(data, slice_offset)? {
        Some(t) => t,
        None => {
            warn!("Could not find symbol table");
            return Ok(0);
        }
    };

    let mut weakened = 0u32;
    for i in 0..tables.symtab.nsyms as usize {
        let offset = tables.symbols + i * NLIST_64_SIZE;
        let mut sym = Nlist64::decode(data, offset)?;
        if sym.n_strx == 0 {
            continue;
        }
        let name = read_cstr(data, tables.strings + sym.n_strx as usize)?;
        if names.contains(&name.as_str()) {
            debug!(symbol = %name, "Weakening symbol");
            sym.n_desc |= N_WEAK_DEF;
            sym.encode_at(data, offset)?;
            weakened += 1;
        }
    }

    Ok(weakened)
}
