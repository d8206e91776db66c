//! Error types for Mach-O patching and loading.
//!
//! One structured error enum covers the whole pipeline so that every
//! component can report a described failure instead of panicking on
//! malformed input.

use thiserror::Error;

/// Main error type for dylibize operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Leading bytes are neither a fat nor a 64-bit Mach-O magic.
    #[error("Unsupported magic: {magic:#010x}")]
    UnsupportedMagic { magic: u32 },

    /// A fat container holds no slice for the requested CPU type.
    #[error("No slice for CPU type {cpu_type:#x} in fat binary")]
    ArchNotFound { cpu_type: i32 },

    /// A slice is not for the architecture the operation requires.
    #[error("Unsupported architecture: expected CPU type {expected:#x}, found {found:#x}")]
    UnsupportedArchitecture { expected: i32, found: i32 },

    /// Data ended before a structure could be fully decoded.
    #[error("Truncated at offset {offset:#x}: needed {needed} bytes")]
    Truncated { offset: usize, needed: usize },

    /// A load command whose declared size would desynchronize the walk.
    #[error("Malformed load command at offset {offset:#x}: {message}")]
    MalformedCommand { offset: usize, message: String },

    /// A required load command or segment is absent.
    #[error("Missing load command: {0}")]
    MissingCommand(&'static str),

    /// No LC_MAIN or usable LC_UNIXTHREAD command was found.
    #[error("No entry point command found")]
    EntryPointNotFound,

    /// Growing the command table would overrun the mapped file.
    #[error("No headroom for inserted load command ({needed} bytes at offset {offset:#x})")]
    NoHeadroom { offset: usize, needed: usize },

    /// Embedded path string does not fit within its command record.
    #[error("Dylib path of {len} bytes does not fit in command of size {cmdsize}")]
    PathTooLong { len: usize, cmdsize: u32 },

    /// Replacement longer than its pattern would change the file length.
    #[error("Replacement ({replacement} bytes) longer than pattern ({pattern} bytes)")]
    ReplacementTooLong { pattern: usize, replacement: usize },

    /// Dynamic load of the transformed image failed.
    #[error("dlopen failed: {0}")]
    DlOpen(String),

    /// The transformed image is not among the process's loaded images.
    #[error("Image not found among loaded modules: {0}")]
    ImageNotLoaded(String),

    /// Slide computation produced an address that cannot be called.
    #[error("Unresolvable entry address: {address:#x}")]
    InvalidEntryAddress { address: u64 },

    /// Path contains an interior NUL or is otherwise not convertible.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// File I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for dylibize operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnsupportedMagic { magic: 0xdeadbeef };
        assert_eq!(err.to_string(), "Unsupported magic: 0xdeadbeef");

        let err = Error::Truncated {
            offset: 0x20,
            needed: 8,
        };
        assert_eq!(err.to_string(), "Truncated at offset 0x20: needed 8 bytes");

        let err = Error::ArchNotFound {
            cpu_type: 0x0100_000c,
        };
        assert!(err.to_string().contains("0x100000c"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
