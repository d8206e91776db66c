//! Dynamic loading and entry-point invocation.
//!
//! Loads a transformed dylib into the current process, correlates it against
//! the static addressing metadata from the on-disk image, and invokes the
//! computed entry address on a dedicated thread with a synthetic argument
//! vector.
//!
//! Invocation is fire-and-forget by design: the foreign program owns its
//! thread until it returns or terminates the process, so there is no join,
//! no cancellation, and no timeout. The caller is responsible for having
//! configured process-wide environment variables beforehand; the invoked
//! code reads them at startup.

use crate::error::{Error, Result};

/// Conventional entry-symbol names tried by direct lookup, in order, before
/// falling back to static entry-point resolution.
pub const ENTRY_SYMBOLS: &[&str] = &["_main", "start", "_start", "main"];

/// Floor applied to the requested stack size for the entry thread.
pub const MIN_STACK_SIZE: usize = 1024 * 1024;

/// Slide between the image's declared load address and its runtime base.
pub fn compute_slide(text_vmaddr: u64, runtime_base: u64) -> i64 {
    runtime_base.wrapping_sub(text_vmaddr) as i64
}

/// Absolute runtime entry address: static `__TEXT` vmaddr plus static entry
/// offset plus slide, which reduces to `runtime_base + entry_offset`.
///
/// Fails when the computation produces the null address, which cannot be
/// invoked.
pub fn absolute_entry_address(
    text_vmaddr: u64,
    entry_offset: u64,
    runtime_base: u64,
) -> Result<u64> {
    let slide = compute_slide(text_vmaddr, runtime_base);
    let address = text_vmaddr
        .wrapping_add(entry_offset)
        .wrapping_add(slide as u64);
    if address == 0 {
        return Err(Error::InvalidEntryAddress { address });
    }
    Ok(address)
}

/// Final path component, or the whole path when it has none.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Whether a loaded image path refers to the target file: exact match, base
/// name match, or suffix match in either direction.
pub fn image_matches(image: &str, target: &str) -> bool {
    image == target
        || base_name(image) == base_name(target)
        || image.ends_with(base_name(target))
        || target.ends_with(image)
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod darwin {
    use super::{absolute_entry_address, base_name, image_matches, ENTRY_SYMBOLS, MIN_STACK_SIZE};
    use crate::error::{Error, Result};
    use crate::macho::types::CPU_TYPE_ARM64;
    use crate::macho::{resolve_entry_point, text_segment_vmaddr};
    use std::ffi::{CStr, CString};
    use std::os::raw::{c_char, c_int, c_void};
    use std::path::Path;
    use tracing::{debug, info, warn};

    extern "C" {
        fn _dyld_image_count() -> u32;
        fn _dyld_get_image_name(index: u32) -> *const c_char;
        fn _dyld_get_image_header(index: u32) -> *const c_void;
    }

    type EntryFn = unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int;

    /// The single foreign-call boundary: invokes a resolved address with the
    /// platform's standard `(argc, argv)` convention.
    ///
    /// # Safety
    ///
    /// `address` must be the entry point of an image loaded into this
    /// process, and `argv` a null-terminated vector that outlives the call.
    unsafe fn call_entry(address: u64, argc: c_int, argv: *mut *mut c_char) -> c_int {
        let entry: EntryFn = std::mem::transmute(address as usize);
        entry(argc, argv)
    }

    /// Finds the runtime base address of the loaded image matching `target`.
    fn runtime_base(target: &str) -> Result<u64> {
        let count = unsafe { _dyld_image_count() };
        for i in 0..count {
            let name_ptr = unsafe { _dyld_get_image_name(i) };
            if name_ptr.is_null() {
                continue;
            }
            let image = unsafe { CStr::from_ptr(name_ptr) }.to_string_lossy();
            if image_matches(&image, target) {
                let header = unsafe { _dyld_get_image_header(i) };
                if header.is_null() {
                    continue;
                }
                return Ok(header as u64);
            }
        }
        Err(Error::ImageNotLoaded(target.to_owned()))
    }

    /// Loads the dylib at `path` and invokes its entry point on a dedicated
    /// thread. Returns once the thread is launched; the foreign code's exit
    /// status is logged, not propagated.
    pub fn run_image<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?
            .to_owned();
        let c_path = CString::new(path_str.clone())
            .map_err(|_| Error::InvalidPath(path_str.clone()))?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
        if handle.is_null() {
            let message = unsafe {
                let err = libc::dlerror();
                if err.is_null() {
                    "unknown dlopen failure".to_owned()
                } else {
                    CStr::from_ptr(err).to_string_lossy().into_owned()
                }
            };
            return Err(Error::DlOpen(message));
        }
        info!(path = %path.display(), "Image loaded");

        // Direct symbol lookup first; resolution via static metadata only
        // when no conventional entry symbol exports.
        let mut entry_address: Option<u64> = None;
        for symbol in ENTRY_SYMBOLS {
            let c_symbol = CString::new(*symbol).expect("entry symbol names have no NUL");
            unsafe { libc::dlerror() };
            let sym = unsafe { libc::dlsym(handle, c_symbol.as_ptr()) };
            if !sym.is_null() && unsafe { libc::dlerror() }.is_null() {
                debug!(symbol, "Found entry symbol");
                entry_address = Some(sym as u64);
                break;
            }
        }

        let mut stack_size = 0u64;
        let address = match entry_address {
            Some(addr) => addr,
            None => {
                let data = std::fs::read(path)?;
                let entry = resolve_entry_point(&data, CPU_TYPE_ARM64)?;
                let text_vmaddr = text_segment_vmaddr(&data, CPU_TYPE_ARM64)?;
                let base = runtime_base(&path_str)?;
                stack_size = entry.stack_size;
                let addr = absolute_entry_address(text_vmaddr, entry.entry_offset, base)?;
                debug!(
                    text_vmaddr = format_args!("{:#x}", text_vmaddr),
                    entry_offset = format_args!("{:#x}", entry.entry_offset),
                    base = format_args!("{:#x}", base),
                    entry = format_args!("{:#x}", addr),
                    "Entry address computed"
                );
                addr
            }
        };

        let program = base_name(&path_str).to_owned();
        let stack = MIN_STACK_SIZE.max(stack_size as usize);

        // Fire-and-forget: the handle is dropped, the thread never joined.
        let _detached = std::thread::Builder::new()
            .name(format!("entry-{program}"))
            .stack_size(stack)
            .spawn(move || {
                let arg0 = CString::new(program).expect("base name has no NUL");
                let mut argv: Vec<*mut c_char> =
                    vec![arg0.as_ptr() as *mut c_char, std::ptr::null_mut()];
                let argc = (argv.len() - 1) as c_int;

                let status = unsafe { call_entry(address, argc, argv.as_mut_ptr()) };
                if status != 0 {
                    warn!(status, "Entry point returned nonzero");
                } else {
                    debug!("Entry point returned");
                }
            })?;

        Ok(())
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use darwin::run_image;
