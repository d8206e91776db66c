//! Memory-mapped file access for in-place patching.
//!
//! Every transformation mutates a memory-mapped copy of the target file and
//! flushes synchronously before the mapping is released, so a crash between
//! independent patch steps does not corrupt earlier results.

use crate::error::Result;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A read-write memory mapping of one file.
///
/// The mapping is flushed on [`FileMap::flush`] and again on drop; callers
/// that care about the error should flush explicitly.
pub struct FileMap {
    path: PathBuf,
    mmap: MmapMut,
}

impl std::fmt::Debug for FileMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMap")
            .field("path", &self.path)
            .field("len", &self.mmap.len())
            .finish()
    }
}

impl FileMap {
    /// Opens a file read-write and maps it for in-place mutation.
    ///
    /// Fails for files that cannot be opened or are empty (an empty file
    /// cannot be mapped, and is never a valid Mach-O).
    pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();

        debug!(path = %path.display(), size = len, "Mapping file read-write");

        if len == 0 {
            return Err(crate::error::Error::Truncated {
                offset: 0,
                needed: 4,
            });
        }

        // Safety: the map is backed by a regular file we hold open; no other
        // writer is expected during a patch (exclusive-access contract).
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    /// Path of the mapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total mapped length in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Read-only view of the file contents.
    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Mutable view of the file contents.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Synchronously flushes all mutations to storage.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}

impl Drop for FileMap {
    fn drop(&mut self) {
        if let Err(e) = self.mmap.flush() {
            warn!(path = %self.path.display(), error = %e, "Flush on drop failed");
        }
    }
}
