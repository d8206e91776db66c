//! Byte-offset accessors for on-disk Mach-O structures.
//!
//! All records are decoded and re-encoded through these helpers; nothing in
//! the crate aliases a live pointer into the mapping.

use crate::error::{Error, Result};

/// Byte order of integer fields.
///
/// Mach-O 64-bit slices are little-endian on every supported host; fat
/// container fields are big-endian on disk and must be swapped consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Trait for reading integer fields at a byte offset.
pub trait EndianRead {
    fn read_u16(&self, offset: usize, endian: Endian) -> Result<u16>;
    fn read_u32(&self, offset: usize, endian: Endian) -> Result<u32>;
    fn read_u64(&self, offset: usize, endian: Endian) -> Result<u64>;
    fn read_i32(&self, offset: usize, endian: Endian) -> Result<i32>;
}

/// Trait for writing integer fields back to the same offsets.
pub trait EndianWrite {
    fn write_u16(&mut self, offset: usize, value: u16, endian: Endian) -> Result<()>;
    fn write_u32(&mut self, offset: usize, value: u32, endian: Endian) -> Result<()>;
    fn write_u64(&mut self, offset: usize, value: u64, endian: Endian) -> Result<()>;
    fn write_i32(&mut self, offset: usize, value: i32, endian: Endian) -> Result<()>;
}

macro_rules! check_bounds {
    ($data:expr, $offset:expr, $len:expr) => {
        if $offset.checked_add($len).map_or(true, |end| end > $data.len()) {
            return Err(Error::Truncated {
                offset: $offset,
                needed: $len,
            });
        }
    };
}

impl EndianRead for [u8] {
    fn read_u16(&self, offset: usize, endian: Endian) -> Result<u16> {
        check_bounds!(self, offset, 2);
        let bytes: [u8; 2] = self[offset..offset + 2].try_into().unwrap();
        Ok(match endian {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        })
    }

    fn read_u32(&self, offset: usize, endian: Endian) -> Result<u32> {
        check_bounds!(self, offset, 4);
        let bytes: [u8; 4] = self[offset..offset + 4].try_into().unwrap();
        Ok(match endian {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        })
    }

    fn read_u64(&self, offset: usize, endian: Endian) -> Result<u64> {
        check_bounds!(self, offset, 8);
        let bytes: [u8; 8] = self[offset..offset + 8].try_into().unwrap();
        Ok(match endian {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        })
    }

    fn read_i32(&self, offset: usize, endian: Endian) -> Result<i32> {
        check_bounds!(self, offset, 4);
        let bytes: [u8; 4] = self[offset..offset + 4].try_into().unwrap();
        Ok(match endian {
            Endian::Little => i32::from_le_bytes(bytes),
            Endian::Big => i32::from_be_bytes(bytes),
        })
    }
}

impl EndianWrite for [u8] {
    fn write_u16(&mut self, offset: usize, value: u16, endian: Endian) -> Result<()> {
        check_bounds!(self, offset, 2);
        let bytes = match endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self[offset..offset + 2].copy_from_slice(&bytes);
        Ok(())
    }

    fn write_u32(&mut self, offset: usize, value: u32, endian: Endian) -> Result<()> {
        check_bounds!(self, offset, 4);
        let bytes = match endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self[offset..offset + 4].copy_from_slice(&bytes);
        Ok(())
    }

    fn write_u64(&mut self, offset: usize, value: u64, endian: Endian) -> Result<()> {
        check_bounds!(self, offset, 8);
        let bytes = match endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self[offset..offset + 8].copy_from_slice(&bytes);
        Ok(())
    }

    fn write_i32(&mut self, offset: usize, value: i32, endian: Endian) -> Result<()> {
        check_bounds!(self, offset, 4);
        let bytes = match endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self[offset..offset + 4].copy_from_slice(&bytes);
        Ok(())
    }
}

/// Read a null-terminated string starting at `offset`.
///
/// The terminator may be the end of the buffer. Non-UTF-8 bytes are replaced
/// lossily; symbol and segment names in well-formed binaries are ASCII.
pub fn read_cstr(data: &[u8], offset: usize) -> Result<String> {
    if offset >= data.len() {
        return Err(Error::Truncated { offset, needed: 1 });
    }
    let slice = &data[offset..];
    let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
    Ok(String::from_utf8_lossy(&slice[..end]).into_owned())
}

/// Interpret a fixed 16-byte name field (segment name) as a string.
pub fn fixed_name(field: &[u8; 16]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Align a value up to the specified alignment (power of two).
pub fn align_up(value: usize, alignment: usize) -> usize {
    let mask = alignment - 1;
    (value + mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_little_endian() {
        let mut buf = vec![0u8; 16];
        buf.write_u32(0, 0xfeed_facf, Endian::Little).unwrap();
        buf.write_u64(8, 0x1_0000_0000, Endian::Little).unwrap();
        assert_eq!(buf.read_u32(0, Endian::Little).unwrap(), 0xfeed_facf);
        assert_eq!(buf.read_u64(8, Endian::Little).unwrap(), 0x1_0000_0000);
    }

    #[test]
    fn big_endian_swaps() {
        let buf = [0xca, 0xfe, 0xba, 0xbe];
        assert_eq!(buf.read_u32(0, Endian::Big).unwrap(), 0xcafe_babe);
        assert_eq!(buf.read_u32(0, Endian::Little).unwrap(), 0xbeba_feca);
    }

    #[test]
    fn truncated_read_fails() {
        let buf = [0u8; 3];
        let err = buf.read_u32(0, Endian::Little).unwrap_err();
        assert!(matches!(
            err,
            Error::Truncated {
                offset: 0,
                needed: 4
            }
        ));
        // Offset overflow must not panic.
        assert!(buf.read_u64(usize::MAX, Endian::Little).is_err());
    }

    #[test]
    fn cstr_reading() {
        let data = b"__TEXT\0junk";
        assert_eq!(read_cstr(data, 0).unwrap(), "__TEXT");
        assert_eq!(read_cstr(data, 7).unwrap(), "junk");
        assert!(read_cstr(data, 11).is_err());
    }

    #[test]
    fn fixed_name_stops_at_nul() {
        let mut field = [0u8; 16];
        field[..6].copy_from_slice(b"__TEXT");
        assert_eq!(fixed_name(&field), "__TEXT");

        let full = *b"0123456789abcdef";
        assert_eq!(fixed_name(&full), "0123456789abcdef");
    }

    #[test]
    fn align_up_to_eight() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(25, 8), 32);
    }
}
