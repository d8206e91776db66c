//! Mach-O parsing and in-place structural mutation.
//!
//! Byte-exact parsing of fat containers, 64-bit headers, and load commands,
//! plus the mutations that turn an executable image into a loadable library.
//! All structures are decoded and re-encoded through byte-offset accessors;
//! nothing holds a live pointer into the mapping.

pub mod commands;
pub mod convert;
pub mod entry;
pub mod fat;
pub mod platform;
pub mod symbols;
pub mod types;
pub mod utils;

pub use commands::{CommandRef, LoadCommandIter};
pub use types::*;
pub use convert::{convert_to_dylib, RUNTIME_SUPPORT_DYLIB};
pub use entry::{resolve_entry_point, text_segment_vmaddr, EntryPoint};
pub use fat::arch_slice_offset;
pub use platform::{patch_platform, replace_pattern};
pub use symbols::{remove_undefined_symbols, weaken_symbols};
