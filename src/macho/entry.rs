//! Static entry-point resolution.
//!
//! Extracts the entry offset and requested stack size from the on-disk
//! image, plus the `__TEXT` segment's declared virtual address. Both handle
//! a fat wrapper transparently and operate on an independent read of the
//! file; they own no state beyond the call.

use crate::error::{Error, Result};
use crate::macho::commands::LoadCommandIter;
use crate::macho::fat::arch_slice_offset;
use crate::macho::types::*;
use crate::macho::utils::{Endian, EndianRead};
use tracing::debug;

/// Static entry-point metadata: entry offset relative to the `__TEXT`
/// vmaddr, plus the requested stack size (zero when the source command does
/// not carry one; callers apply a floor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub entry_offset: u64,
    pub stack_size: u64,
}

/// Resolves the entry point of the `cpu_type` slice.
///
/// Prefers a dedicated LC_MAIN command; falls back to the program counter
/// inside a legacy LC_UNIXTHREAD ARM64 register dump. Fails if neither is
/// present after exhausting all commands.
pub fn resolve_entry_point(data: &[u8], cpu_type: i32) -> Result<EntryPoint> {
    let slice_offset = arch_slice_offset(data, cpu_type)? as usize;
    let header = MachHeader64::decode(data, slice_offset)?;
    if header.cputype != cpu_type {
        return Err(Error::UnsupportedArchitecture {
            expected: cpu_type,
            found: header.cputype,
        });
    }

    for item in LoadCommandIter::new(data, slice_offset, &header) {
        let cmd = item?;
        match cmd.cmd {
            LC_MAIN => {
                let ep = EntryPointCommand::decode(data, cmd.offset)?;
                debug!(
                    entry_offset = format_args!("{:#x}", ep.entryoff),
                    stack_size = format_args!("{:#x}", ep.stacksize),
                    "Found LC_MAIN"
                );
                return Ok(EntryPoint {
                    entry_offset: ep.entryoff,
                    stack_size: ep.stacksize,
                });
            }
            LC_UNIXTHREAD => {
                let flavor = data.read_u32(cmd.offset + 8, Endian::Little)?;
                if flavor != ARM_THREAD_STATE64 {
                    continue;
                }
                // pc follows x0..x28, fp, lr, sp in the register dump.
                let pc = data.read_u64(cmd.offset + UNIXTHREAD_PC_OFFSET, Endian::Little)?;
                debug!(pc = format_args!("{:#x}", pc), "Found LC_UNIXTHREAD");
                return Ok(EntryPoint {
                    entry_offset: pc,
                    stack_size: 0,
                });
            }
            _ => {}
        }
    }

    Err(Error::EntryPointNotFound)
}

/// Returns the declared virtual address of the `__TEXT` segment in the
/// `cpu_type` slice.
pub fn text_segment_vmaddr(data: &[u8], cpu_type: i32) -> Result<u64> {
    let slice_offset = arch_slice_offset(data, cpu_type)? as usize;

    for item in LoadCommandIter::from_slice(data, slice_offset)? {
        let cmd = item?;
        if cmd.cmd == LC_SEGMENT_64 {
            let seg = SegmentCommand64::decode(data, cmd.offset)?;
            if seg.name() == SEG_TEXT {
                return Ok(seg.vmaddr);
            }
        }
    }

    Err(Error::MissingCommand("__TEXT segment"))
}
