//! Load-command walking.
//!
//! Every higher component iterates a slice's load commands through
//! [`LoadCommandIter`]. Each step advances strictly by the current command's
//! declared size; a zero or misaligned size halts the walk with an error
//! rather than looping.

use crate::error::{Error, Result};
use crate::macho::types::{LoadCommand, MachHeader64, LOAD_COMMAND_SIZE, MACH_HEADER_64_SIZE};

/// One visited load command: its absolute byte offset in the file plus the
/// decoded 8-byte prefix.
#[derive(Debug, Clone, Copy)]
pub struct CommandRef {
    pub offset: usize,
    pub cmd: u32,
    pub cmdsize: u32,
}

/// Lazy, finite walk over a slice's load-command list.
///
/// Not restartable; construct a new iterator to walk again.
pub struct LoadCommandIter<'a> {
    data: &'a [u8],
    next: usize,
    remaining: u32,
    halted: bool,
}

impl<'a> LoadCommandIter<'a> {
    /// Walk the commands of the slice beginning at `slice_offset`, whose
    /// header has already been decoded.
    pub fn new(data: &'a [u8], slice_offset: usize, header: &MachHeader64) -> Self {
        Self {
            data,
            next: slice_offset + MACH_HEADER_64_SIZE,
            remaining: header.ncmds,
            halted: false,
        }
    }

    /// Decode the header at `slice_offset` and walk its commands.
    pub fn from_slice(data: &'a [u8], slice_offset: usize) -> Result<Self> {
        let header = MachHeader64::decode(data, slice_offset)?;
        Ok(Self::new(data, slice_offset, &header))
    }
}

impl Iterator for LoadCommandIter<'_> {
    type Item = Result<CommandRef>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.halted || self.remaining == 0 {
            return None;
        }

        let offset = self.next;
        let lc = match LoadCommand::decode(self.data, offset) {
            Ok(lc) => lc,
            Err(e) => {
                self.halted = true;
                return Some(Err(e));
            }
        };

        if lc.cmdsize < LOAD_COMMAND_SIZE as u32 || lc.cmdsize % 8 != 0 {
            self.halted = true;
            return Some(Err(Error::MalformedCommand {
                offset,
                message: format!("cmdsize {} is zero, short, or not 8-aligned", lc.cmdsize),
            }));
        }

        let end = offset.checked_add(lc.cmdsize as usize);
        if end.map_or(true, |e| e > self.data.len()) {
            self.halted = true;
            return Some(Err(Error::MalformedCommand {
                offset,
                message: format!("cmdsize {} overruns the file", lc.cmdsize),
            }));
        }

        self.next = offset + lc.cmdsize as usize;
        self.remaining -= 1;

        Some(Ok(CommandRef {
            offset,
            cmd: lc.cmd,
            cmdsize: lc.cmdsize,
        }))
    }
}
