//! On-disk Mach-O record types and constants.
//!
//! Each structure is an explicit fixed-layout record decoded via byte-offset
//! accessors; mutation is decode, modify fields, re-encode to the same
//! offset. Only 64-bit little-endian slices are supported.

use crate::error::{Error, Result};
use crate::macho::utils::{Endian, EndianRead, EndianWrite};
use bitflags::bitflags;

// Magic numbers (as read little-endian from offset 0).
pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const FAT_CIGAM: u32 = 0xbeba_feca;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;

pub const CPU_TYPE_ARM64: i32 = 0x0100_000c;

// Mach-O file types.
pub const MH_EXECUTE: u32 = 0x2;
pub const MH_DYLIB: u32 = 0x6;

// Load command tags.
pub const LC_REQ_DYLD: u32 = 0x8000_0000;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_UNIXTHREAD: u32 = 0x5;
pub const LC_DYSYMTAB: u32 = 0xb;
pub const LC_LOAD_DYLIB: u32 = 0xc;
pub const LC_ID_DYLIB: u32 = 0xd;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
pub const LC_BUILD_VERSION: u32 = 0x32;

/// Reserved command tag repurposed to mark an inert, injectable dependency
/// slot. Toggled to `LC_LOAD_DYLIB` when injection is enabled.
pub const LC_PLACEHOLDER_DYLIB: u32 = 0x0011_4514;

// Build-version platforms.
pub const PLATFORM_MACOS: u32 = 1;
pub const PLATFORM_IOS: u32 = 2;
pub const PLATFORM_IOSSIMULATOR: u32 = 7;

/// Weak-definition bit in an nlist description field.
pub const N_WEAK_DEF: u16 = 0x0080;

/// ARM64 thread-state flavor in LC_UNIXTHREAD.
pub const ARM_THREAD_STATE64: u32 = 6;

/// Canonical `__PAGEZERO` virtual size before conversion.
pub const PAGEZERO_VMSIZE: u64 = 0x1_0000_0000;
/// Guard region size `__PAGEZERO` is shrunk to after conversion.
pub const PAGEZERO_GUARD_SIZE: u64 = 0x4000;

pub const SEG_TEXT: &str = "__TEXT";
pub const SEG_LINKEDIT: &str = "__LINKEDIT";

// Record sizes on disk.
pub const FAT_HEADER_SIZE: usize = 8;
pub const FAT_ARCH_SIZE: usize = 20;
pub const MACH_HEADER_64_SIZE: usize = 32;
pub const LOAD_COMMAND_SIZE: usize = 8;
pub const SEGMENT_COMMAND_64_SIZE: usize = 72;
pub const DYLIB_COMMAND_SIZE: usize = 24;
pub const NLIST_64_SIZE: usize = 16;

/// Byte offset of the program counter inside an LC_UNIXTHREAD command:
/// cmd, cmdsize, flavor, count (16 bytes), then x0..x28, fp, lr, sp
/// (32 eight-byte register slots) precede pc in `arm_thread_state64`.
pub const UNIXTHREAD_PC_OFFSET: usize = 16 + 32 * 8;

bitflags! {
    /// Mach-O header flags this crate inspects or rewrites.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        /// Image re-exports none of its dependent libraries.
        const NO_REEXPORTED_DYLIBS = 0x10_0000;
        /// Position-independent executable; cleared during conversion.
        const PIE = 0x20_0000;

        const _ = !0;
    }
}

/// One architecture descriptor inside a fat container.
///
/// Field byte order depends on the container; all fields must be swapped
/// consistently before use.
#[derive(Debug, Clone, Copy)]
pub struct FatArch {
    pub cputype: i32,
    pub cpusubtype: i32,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
}

impl FatArch {
    pub fn decode(data: &[u8], offset: usize, endian: Endian) -> Result<Self> {
        Ok(Self {
            cputype: data.read_i32(offset, endian)?,
            cpusubtype: data.read_i32(offset + 4, endian)?,
            offset: data.read_u32(offset + 8, endian)?,
            size: data.read_u32(offset + 12, endian)?,
            align: data.read_u32(offset + 16, endian)?,
        })
    }
}

/// 64-bit Mach-O header.
#[derive(Debug, Clone, Copy)]
pub struct MachHeader64 {
    pub magic: u32,
    pub cputype: i32,
    pub cpusubtype: i32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: HeaderFlags,
    pub reserved: u32,
}

impl MachHeader64 {
    /// Decode a header at `offset`, rejecting any magic other than the
    /// 64-bit little-endian value.
    pub fn decode(data: &[u8], offset: usize) -> Result<Self> {
        let magic = data.read_u32(offset, Endian::Little)?;
        if magic != MH_MAGIC_64 {
            return Err(Error::UnsupportedMagic { magic });
        }
        Ok(Self {
            magic,
            cputype: data.read_i32(offset + 4, Endian::Little)?,
            cpusubtype: data.read_i32(offset + 8, Endian::Little)?,
            filetype: data.read_u32(offset + 12, Endian::Little)?,
            ncmds: data.read_u32(offset + 16, Endian::Little)?,
            sizeofcmds: data.read_u32(offset + 20, Endian::Little)?,
            flags: HeaderFlags::from_bits_retain(data.read_u32(offset + 24, Endian::Little)?),
            reserved: data.read_u32(offset + 28, Endian::Little)?,
        })
    }

    pub fn encode_at(&self, data: &mut [u8], offset: usize) -> Result<()> {
        data.write_u32(offset, self.magic, Endian::Little)?;
        data.write_i32(offset + 4, self.cputype, Endian::Little)?;
        data.write_i32(offset + 8, self.cpusubtype, Endian::Little)?;
        data.write_u32(offset + 12, self.filetype, Endian::Little)?;
        data.write_u32(offset + 16, self.ncmds, Endian::Little)?;
        data.write_u32(offset + 20, self.sizeofcmds, Endian::Little)?;
        data.write_u32(offset + 24, self.flags.bits(), Endian::Little)?;
        data.write_u32(offset + 28, self.reserved, Endian::Little)?;
        Ok(())
    }
}

/// Common 8-byte prefix of every load command.
#[derive(Debug, Clone, Copy)]
pub struct LoadCommand {
    pub cmd: u32,
    pub cmdsize: u32,
}

impl LoadCommand {
    pub fn decode(data: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            cmd: data.read_u32(offset, Endian::Little)?,
            cmdsize: data.read_u32(offset + 4, Endian::Little)?,
        })
    }
}

/// 64-bit segment command.
#[derive(Debug, Clone)]
pub struct SegmentCommand64 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: i32,
    pub initprot: i32,
    pub nsects: u32,
    pub flags: u32,
}

impl SegmentCommand64 {
    pub fn decode(data: &[u8], offset: usize) -> Result<Self> {
        if offset + SEGMENT_COMMAND_64_SIZE > data.len() {
            return Err(Error::Truncated {
                offset,
                needed: SEGMENT_COMMAND_64_SIZE,
            });
        }
        let mut segname = [0u8; 16];
        segname.copy_from_slice(&data[offset + 8..offset + 24]);
        Ok(Self {
            cmd: data.read_u32(offset, Endian::Little)?,
            cmdsize: data.read_u32(offset + 4, Endian::Little)?,
            segname,
            vmaddr: data.read_u64(offset + 24, Endian::Little)?,
            vmsize: data.read_u64(offset + 32, Endian::Little)?,
            fileoff: data.read_u64(offset + 40, Endian::Little)?,
            filesize: data.read_u64(offset + 48, Endian::Little)?,
            maxprot: data.read_i32(offset + 56, Endian::Little)?,
            initprot: data.read_i32(offset + 60, Endian::Little)?,
            nsects: data.read_u32(offset + 64, Endian::Little)?,
            flags: data.read_u32(offset + 68, Endian::Little)?,
        })
    }

    pub fn encode_at(&self, data: &mut [u8], offset: usize) -> Result<()> {
        if offset + SEGMENT_COMMAND_64_SIZE > data.len() {
            return Err(Error::Truncated {
                offset,
                needed: SEGMENT_COMMAND_64_SIZE,
            });
        }
        data.write_u32(offset, self.cmd, Endian::Little)?;
        data.write_u32(offset + 4, self.cmdsize, Endian::Little)?;
        data[offset + 8..offset + 24].copy_from_slice(&self.segname);
        data.write_u64(offset + 24, self.vmaddr, Endian::Little)?;
        data.write_u64(offset + 32, self.vmsize, Endian::Little)?;
        data.write_u64(offset + 40, self.fileoff, Endian::Little)?;
        data.write_u64(offset + 48, self.filesize, Endian::Little)?;
        data.write_i32(offset + 56, self.maxprot, Endian::Little)?;
        data.write_i32(offset + 60, self.initprot, Endian::Little)?;
        data.write_u32(offset + 64, self.nsects, Endian::Little)?;
        data.write_u32(offset + 68, self.flags, Endian::Little)?;
        Ok(())
    }

    /// Segment name with trailing NULs stripped.
    pub fn name(&self) -> String {
        crate::macho::utils::fixed_name(&self.segname)
    }
}

/// Dylib identity or dependency command. The embedded path string follows
/// the fixed fields, at `name_offset` from the command start.
#[derive(Debug, Clone, Copy)]
pub struct DylibCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub name_offset: u32,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
}

impl DylibCommand {
    pub fn decode(data: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            cmd: data.read_u32(offset, Endian::Little)?,
            cmdsize: data.read_u32(offset + 4, Endian::Little)?,
            name_offset: data.read_u32(offset + 8, Endian::Little)?,
            timestamp: data.read_u32(offset + 12, Endian::Little)?,
            current_version: data.read_u32(offset + 16, Endian::Little)?,
            compatibility_version: data.read_u32(offset + 20, Endian::Little)?,
        })
    }

    pub fn encode_at(&self, data: &mut [u8], offset: usize) -> Result<()> {
        data.write_u32(offset, self.cmd, Endian::Little)?;
        data.write_u32(offset + 4, self.cmdsize, Endian::Little)?;
        data.write_u32(offset + 8, self.name_offset, Endian::Little)?;
        data.write_u32(offset + 12, self.timestamp, Endian::Little)?;
        data.write_u32(offset + 16, self.current_version, Endian::Little)?;
        data.write_u32(offset + 20, self.compatibility_version, Endian::Little)?;
        Ok(())
    }
}

/// Symbol table location command.
#[derive(Debug, Clone, Copy)]
pub struct SymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

impl SymtabCommand {
    pub fn decode(data: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            cmd: data.read_u32(offset, Endian::Little)?,
            cmdsize: data.read_u32(offset + 4, Endian::Little)?,
            symoff: data.read_u32(offset + 8, Endian::Little)?,
            nsyms: data.read_u32(offset + 12, Endian::Little)?,
            stroff: data.read_u32(offset + 16, Endian::Little)?,
            strsize: data.read_u32(offset + 20, Endian::Little)?,
        })
    }
}

/// Dynamic symbol table command; only the undefined sub-range is consulted.
/// `nundefsym` sits at byte 28 of the 80-byte record and is the one field
/// written back.
#[derive(Debug, Clone, Copy)]
pub struct DysymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
}

impl DysymtabCommand {
    pub fn decode(data: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            cmd: data.read_u32(offset, Endian::Little)?,
            cmdsize: data.read_u32(offset + 4, Endian::Little)?,
            iundefsym: data.read_u32(offset + 24, Endian::Little)?,
            nundefsym: data.read_u32(offset + 28, Endian::Little)?,
        })
    }

    pub fn write_nundefsym(data: &mut [u8], offset: usize, value: u32) -> Result<()> {
        data.write_u32(offset + 28, value, Endian::Little)
    }
}

/// One 64-bit symbol table entry (nlist_64).
#[derive(Debug, Clone, Copy, Default)]
pub struct Nlist64 {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

impl Nlist64 {
    pub fn decode(data: &[u8], offset: usize) -> Result<Self> {
        if offset + NLIST_64_SIZE > data.len() {
            return Err(Error::Truncated {
                offset,
                needed: NLIST_64_SIZE,
            });
        }
        Ok(Self {
            n_strx: data.read_u32(offset, Endian::Little)?,
            n_type: data[offset + 4],
            n_sect: data[offset + 5],
            n_desc: data.read_u16(offset + 6, Endian::Little)?,
            n_value: data.read_u64(offset + 8, Endian::Little)?,
        })
    }

    pub fn encode_at(&self, data: &mut [u8], offset: usize) -> Result<()> {
        if offset + NLIST_64_SIZE > data.len() {
            return Err(Error::Truncated {
                offset,
                needed: NLIST_64_SIZE,
            });
        }
        data.write_u32(offset, self.n_strx, Endian::Little)?;
        data[offset + 4] = self.n_type;
        data[offset + 5] = self.n_sect;
        data.write_u16(offset + 6, self.n_desc, Endian::Little)?;
        data.write_u64(offset + 8, self.n_value, Endian::Little)?;
        Ok(())
    }
}

/// LC_MAIN command: entry offset relative to `__TEXT` vmaddr plus the
/// requested initial stack size.
#[derive(Debug, Clone, Copy)]
pub struct EntryPointCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub entryoff: u64,
    pub stacksize: u64,
}

impl EntryPointCommand {
    pub fn decode(data: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            cmd: data.read_u32(offset, Endian::Little)?,
            cmdsize: data.read_u32(offset + 4, Endian::Little)?,
            entryoff: data.read_u64(offset + 8, Endian::Little)?,
            stacksize: data.read_u64(offset + 16, Endian::Little)?,
        })
    }
}

/// LC_BUILD_VERSION command; only the platform field is rewritten.
#[derive(Debug, Clone, Copy)]
pub struct BuildVersionCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub platform: u32,
    pub minos: u32,
    pub sdk: u32,
    pub ntools: u32,
}

impl BuildVersionCommand {
    pub fn decode(data: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            cmd: data.read_u32(offset, Endian::Little)?,
            cmdsize: data.read_u32(offset + 4, Endian::Little)?,
            platform: data.read_u32(offset + 8, Endian::Little)?,
            minos: data.read_u32(offset + 12, Endian::Little)?,
            sdk: data.read_u32(offset + 16, Endian::Little)?,
            ntools: data.read_u32(offset + 20, Endian::Little)?,
        })
    }

    pub fn write_platform(data: &mut [u8], offset: usize, platform: u32) -> Result<()> {
        data.write_u32(offset + 8, platform, Endian::Little)
    }
}
