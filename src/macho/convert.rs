//! Executable-to-library conversion.
//!
//! Rewrites a slice's header so the platform loader accepts it as a dylib,
//! shrinks `__PAGEZERO` to a guard region, and injects (or toggles) the
//! runtime-support dependency plus an identity command.

use crate::error::{Error, Result};
use crate::macho::commands::LoadCommandIter;
use crate::macho::types::*;
use crate::macho::utils::{align_up, read_cstr};
use tracing::{debug, info};

/// Dependency path injected into converted binaries. The placeholder slot is
/// rewritten to load this library when injection is enabled.
pub const RUNTIME_SUPPORT_DYLIB: &str = "/usr/lib/libc++.1.dylib";

/// Converts the executable slice at `slice_offset` into dylib form.
///
/// `identity` becomes the library's recorded identity when the slice has no
/// LC_ID_DYLIB command (callers pass the output file's base name). `inject`
/// toggles the dependency slot between an active LC_LOAD_DYLIB and the inert
/// placeholder tag.
///
/// Running this twice does not duplicate commands: the scan recognises both
/// the placeholder tag and an already-injected dependency, and mutates in
/// place.
///
/// # Panics
///
/// Panics if a zero-base segment is present without the canonical 4 GiB
/// virtual size; that shape is a programmer-error assertion, not an input
/// error.
pub fn convert_to_dylib(
    data: &mut [u8],
    slice_offset: usize,
    identity: &str,
    inject: bool,
) -> Result<()> {
    let mut header = MachHeader64::decode(data, slice_offset)?;
    if header.cputype != CPU_TYPE_ARM64 {
        return Err(Error::UnsupportedArchitecture {
            expected: CPU_TYPE_ARM64,
            found: header.cputype,
        });
    }

    header.filetype = MH_DYLIB;
    header.flags |= HeaderFlags::NO_REEXPORTED_DYLIBS;
    header.flags &= !HeaderFlags::PIE;
    header.encode_at(data, slice_offset)?;
    debug!(offset = slice_offset, "Header rewritten to MH_DYLIB");

    // Single scan: locate __PAGEZERO, an identity command, and the
    // injectable dependency slot.
    let mut has_identity = false;
    let mut dependency_slot: Option<usize> = None;
    let mut pagezero: Option<usize> = None;

    for item in LoadCommandIter::new(data, slice_offset, &header) {
        let cmd = item?;
        match cmd.cmd {
            LC_ID_DYLIB => has_identity = true,
            LC_PLACEHOLDER_DYLIB => dependency_slot = Some(cmd.offset),
            LC_LOAD_DYLIB => {
                let dylib = DylibCommand::decode(data, cmd.offset)?;
                let path = read_cstr(data, cmd.offset + dylib.name_offset as usize)?;
                if path == RUNTIME_SUPPORT_DYLIB {
                    dependency_slot = Some(cmd.offset);
                }
            }
            LC_SEGMENT_64 => {
                let seg = SegmentCommand64::decode(data, cmd.offset)?;
                if seg.vmaddr == 0 {
                    pagezero = Some(cmd.offset);
                }
            }
            _ => {}
        }
    }

    if let Some(offset) = pagezero {
        shrink_pagezero(data, offset)?;
    }

    match dependency_slot {
        Some(offset) => toggle_dependency_slot(data, offset, inject)?,
        None => {
            let tag = if inject {
                LC_LOAD_DYLIB
            } else {
                LC_PLACEHOLDER_DYLIB
            };
            insert_dylib_command(data, slice_offset, tag, RUNTIME_SUPPORT_DYLIB)?;
            info!(path = RUNTIME_SUPPORT_DYLIB, inject, "Dependency command inserted");
        }
    }

    if !has_identity {
        insert_dylib_command(data, slice_offset, LC_ID_DYLIB, identity)?;
        info!(identity, "Identity command inserted");
    }

    Ok(())
}

/// Shrinks a zero-base segment from the canonical 4 GiB to a 16 KiB guard
/// region based just below `0x1_0000_0000`, so the image loads at a
/// non-zero base.
fn shrink_pagezero(data: &mut [u8], offset: usize) -> Result<()> {
    let mut seg = SegmentCommand64::decode(data, offset)?;
    assert_eq!(
        seg.vmsize, PAGEZERO_VMSIZE,
        "zero-base segment has unexpected vmsize {:#x}",
        seg.vmsize
    );
    seg.vmaddr = PAGEZERO_VMSIZE - PAGEZERO_GUARD_SIZE;
    seg.vmsize = PAGEZERO_GUARD_SIZE;
    seg.encode_at(data, offset)?;
    debug!(offset, "__PAGEZERO shrunk to guard region");
    Ok(())
}

/// Rewrites an existing dependency slot in place: activates or deactivates
/// its command tag and overwrites the embedded path.
fn toggle_dependency_slot(data: &mut [u8], offset: usize, inject: bool) -> Result<()> {
    let mut dylib = DylibCommand::decode(data, offset)?;
    dylib.cmd = if inject {
        LC_LOAD_DYLIB
    } else {
        LC_PLACEHOLDER_DYLIB
    };
    dylib.encode_at(data, offset)?;

    write_command_path(data, offset, dylib.name_offset, dylib.cmdsize, RUNTIME_SUPPORT_DYLIB)?;
    debug!(offset, inject, "Dependency slot toggled in place");
    Ok(())
}

/// Inserts a brand-new dylib command into the slice at `slice_offset`.
///
/// An identity command is placed immediately after the header, shifting the
/// existing command block forward; a dependency command is appended past the
/// last command. Growth happens inside the padding that standard toolchains
/// leave between the command table and the first section; the bounds check
/// only guards the file mapping itself.
pub fn insert_dylib_command(
    data: &mut [u8],
    slice_offset: usize,
    cmd: u32,
    path: &str,
) -> Result<()> {
    let mut header = MachHeader64::decode(data, slice_offset)?;

    let name_len = path.len() + 1;
    let cmdsize = DYLIB_COMMAND_SIZE + align_up(name_len, 8);

    let cmds_start = slice_offset + MACH_HEADER_64_SIZE;
    let cmds_end = cmds_start + header.sizeofcmds as usize;

    if cmds_end + cmdsize > data.len() {
        return Err(Error::NoHeadroom {
            offset: cmds_end,
            needed: cmdsize,
        });
    }

    let position = if cmd == LC_ID_DYLIB {
        // Shift the whole command block forward to open a slot at the front.
        data.copy_within(cmds_start..cmds_end, cmds_start + cmdsize);
        cmds_start
    } else {
        cmds_end
    };
    data[position..position + cmdsize].fill(0);

    let dylib = DylibCommand {
        cmd,
        cmdsize: cmdsize as u32,
        name_offset: DYLIB_COMMAND_SIZE as u32,
        timestamp: 2,
        current_version: 0x1_0000,
        compatibility_version: 0x1_0000,
    };
    dylib.encode_at(data, position)?;
    write_command_path(data, position, dylib.name_offset, dylib.cmdsize, path)?;

    header.ncmds += 1;
    header.sizeofcmds += cmdsize as u32;
    header.encode_at(data, slice_offset)?;
    Ok(())
}

/// Writes a null-terminated path into a dylib command, checking it fits
/// within the command's declared size.
fn write_command_path(
    data: &mut [u8],
    cmd_offset: usize,
    name_offset: u32,
    cmdsize: u32,
    path: &str,
) -> Result<()> {
    let len = path.len() + 1;
    if name_offset as usize + len > cmdsize as usize {
        return Err(Error::PathTooLong { len, cmdsize });
    }
    let start = cmd_offset + name_offset as usize;
    data[start..start + path.len()].copy_from_slice(path.as_bytes());
    data[start + path.len()] = 0;
    Ok(())
}
