//! Fat (universal) container handling.
//!
//! Resolves the file offset of an architecture's Mach-O slice. Thin 64-bit
//! files resolve to offset zero; fat containers are scanned linearly with
//! consistent byte swapping.

use crate::error::{Error, Result};
use crate::macho::types::{FatArch, FAT_ARCH_SIZE, FAT_CIGAM, FAT_HEADER_SIZE, FAT_MAGIC, MH_MAGIC_64};
use crate::macho::utils::{Endian, EndianRead};
use tracing::debug;

/// Returns the byte offset where the slice for `cpu_type` begins.
///
/// A thin 64-bit Mach-O is its own slice at offset zero (the CPU type is not
/// checked here; per-operation code validates it against the header). Any
/// magic other than fat or 64-bit Mach-O is an unsupported-format failure.
pub fn arch_slice_offset(data: &[u8], cpu_type: i32) -> Result<u64> {
    let magic = data.read_u32(0, Endian::Little)?;

    let endian = match magic {
        // Fat fields are big-endian on disk; a container written in host
        // order is accepted too, swapped consistently either way.
        FAT_CIGAM => Endian::Big,
        FAT_MAGIC => Endian::Little,
        MH_MAGIC_64 => return Ok(0),
        other => return Err(Error::UnsupportedMagic { magic: other }),
    };

    let nfat_arch = data.read_u32(4, endian)?;
    debug!(arch_count = nfat_arch, "Scanning fat container");

    for i in 0..nfat_arch as usize {
        let arch = FatArch::decode(data, FAT_HEADER_SIZE + i * FAT_ARCH_SIZE, endian)?;
        if arch.cputype == cpu_type {
            debug!(index = i, offset = arch.offset, "Found matching slice");
            return Ok(u64::from(arch.offset));
        }
    }

    Err(Error::ArchNotFound { cpu_type })
}

/// Enumerates every slice offset in the file.
///
/// For a thin 64-bit file this is the single offset zero. Used by
/// operations that patch all slices rather than one architecture.
pub fn all_slice_offsets(data: &[u8]) -> Result<Vec<u64>> {
    let magic = data.read_u32(0, Endian::Little)?;

    let endian = match magic {
        FAT_CIGAM => Endian::Big,
        FAT_MAGIC => Endian::Little,
        MH_MAGIC_64 => return Ok(vec![0]),
        other => return Err(Error::UnsupportedMagic { magic: other }),
    };

    let nfat_arch = data.read_u32(4, endian)?;
    let mut offsets = Vec::with_capacity(nfat_arch as usize);
    for i in 0..nfat_arch as usize {
        let arch = FatArch::decode(data, FAT_HEADER_SIZE + i * FAT_ARCH_SIZE, endian)?;
        offsets.push(u64::from(arch.offset));
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::types::CPU_TYPE_ARM64;
    use crate::macho::utils::EndianWrite;

    const CPU_TYPE_X86_64: i32 = 0x0100_0007;

    fn fat_container(endian: Endian, arches: &[(i32, u32)]) -> Vec<u8> {
        let mut buf = vec![0u8; FAT_HEADER_SIZE + arches.len() * FAT_ARCH_SIZE + 64];
        let magic = match endian {
            Endian::Big => FAT_CIGAM,    // big-endian on disk reads as CIGAM
            Endian::Little => FAT_MAGIC, // host-order container
        };
        buf.write_u32(0, magic, Endian::Little).unwrap();
        buf.write_u32(4, arches.len() as u32, endian).unwrap();
        for (i, (cpu, offset)) in arches.iter().enumerate() {
            let base = FAT_HEADER_SIZE + i * FAT_ARCH_SIZE;
            buf.write_i32(base, *cpu, endian).unwrap();
            buf.write_i32(base + 4, 0, endian).unwrap();
            buf.write_u32(base + 8, *offset, endian).unwrap();
            buf.write_u32(base + 12, 0x100, endian).unwrap();
            buf.write_u32(base + 16, 14, endian).unwrap();
        }
        buf
    }

    #[test]
    fn resolves_matching_slice_big_endian() {
        let data = fat_container(
            Endian::Big,
            &[(CPU_TYPE_X86_64, 0x1000), (CPU_TYPE_ARM64, 0x8000)],
        );
        assert_eq!(arch_slice_offset(&data, CPU_TYPE_ARM64).unwrap(), 0x8000);
        assert_eq!(arch_slice_offset(&data, CPU_TYPE_X86_64).unwrap(), 0x1000);
    }

    #[test]
    fn resolves_matching_slice_host_order() {
        let data = fat_container(Endian::Little, &[(CPU_TYPE_ARM64, 0x4000)]);
        assert_eq!(arch_slice_offset(&data, CPU_TYPE_ARM64).unwrap(), 0x4000);
    }

    #[test]
    fn missing_architecture_is_not_found() {
        let data = fat_container(Endian::Big, &[(CPU_TYPE_X86_64, 0x1000)]);
        assert!(matches!(
            arch_slice_offset(&data, CPU_TYPE_ARM64),
            Err(Error::ArchNotFound { .. })
        ));
    }

    #[test]
    fn thin_binary_is_offset_zero() {
        let mut buf = vec![0u8; 32];
        buf.write_u32(0, MH_MAGIC_64, Endian::Little).unwrap();
        assert_eq!(arch_slice_offset(&buf, CPU_TYPE_ARM64).unwrap(), 0);
        assert_eq!(all_slice_offsets(&buf).unwrap(), vec![0]);
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let buf = vec![0x7f, b'E', b'L', b'F', 0, 0, 0, 0];
        assert!(matches!(
            arch_slice_offset(&buf, CPU_TYPE_ARM64),
            Err(Error::UnsupportedMagic { .. })
        ));
    }

    #[test]
    fn all_offsets_cover_every_slice() {
        let data = fat_container(
            Endian::Big,
            &[(CPU_TYPE_X86_64, 0x1000), (CPU_TYPE_ARM64, 0x8000)],
        );
        assert_eq!(all_slice_offsets(&data).unwrap(), vec![0x1000, 0x8000]);
    }
}
