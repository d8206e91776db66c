//! dylibize: Mach-O executable-to-library transformation and entry-point
//! invocation.
//!
//! Takes an ARM64 Mach-O executable (thin or inside a universal container),
//! rewrites its load-command table and header fields so the platform's
//! dynamic loader accepts it as a shared library, then locates and invokes
//! its original entry point with a synthetic argument vector on a dedicated
//! thread.
//!
//! The typical flow is [`patcher::Patcher`] to produce the transformed file,
//! then `loader::run_image` (Apple targets) to load and invoke it. The
//! building blocks live under [`macho`] for callers that need finer control.

pub mod error;
pub mod io;
pub mod loader;
pub mod logging;
pub mod macho;
pub mod patcher;

pub use error::{Error, Result};
pub use patcher::Patcher;
