//! Per-file patch pipeline.
//!
//! A [`Patcher`] owns one source executable and its derived output path and
//! runs the transformation steps in order, flushing each step to disk before
//! the next. Steps are also callable individually; each ensures the output
//! copy exists first, so a pipeline can be resumed or run piecemeal.

use crate::error::{Error, Result};
use crate::io::FileMap;
use crate::macho::types::CPU_TYPE_ARM64;
use crate::macho::{self, arch_slice_offset};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Undefined symbols stripped by default: display/graphics lookups known to
/// fail under a windowless host.
pub const DEFAULT_SYMBOLS_TO_REMOVE: &[&str] = &[
    "CGDisplayCopyAllDisplayModes",
    "_CGDisplayCopyAllDisplayModes",
    "_CGDisplayModeCopyPixelEncoding",
    "_CGDisplayModeGetPixelWidth",
    "_CGDisplayModeGetPixelHeight",
    "_CGDisplayModeGetRefreshRate",
    "_CGDisplayModeRelease",
    "_CGMainDisplayID",
    "_CGDisplayBounds",
    "_CGDisplayPixelsWide",
    "_CGDisplayPixelsHigh",
];

/// Built-in dependency remap table: original install path to a
/// runtime-resolvable equivalent. Every replacement is no longer than its
/// pattern, keeping the zero-padding substitution length-safe.
pub const KNOWN_DEPENDENCY_REMAPS: &[(&str, &str)] = &[
    ("/usr/lib/libpcre.0.dylib", "@rpath/libpcre.1.dylib"),
    ("/usr/lib/libSystem.B.dylib", "@rpath/LIBSYSTEM.dylib"),
    (
        "/opt/homebrew/opt/ncurses/lib/libncursesw.6.dylib",
        "@rpath/libncursesw.6.dylib",
    ),
    (
        "/System/Library/Frameworks/Foundation.framework/Versions/C/Foundation",
        "@rpath/Foundation.dylib",
    ),
    (
        "/System/Library/Frameworks/CoreFoundation.framework/Versions/A/CoreFoundation",
        "/System/Library/Frameworks/CoreFoundation.framework/CoreFoundation",
    ),
    (
        "/System/Library/Frameworks/CoreServices.framework/Versions/A/CoreServices",
        "@rpath/CoreServices.dylib",
    ),
    (
        "/System/Library/Frameworks/Security.framework/Versions/A/Security",
        "/System/Library/Frameworks/Security.framework/Security",
    ),
    (
        "/System/Library/Frameworks/IOKit.framework/Versions/A/IOKit",
        "@rpath/IOKit.dylib",
    ),
    (
        "/System/Library/Frameworks/CoreGraphics.framework/Versions/A/CoreGraphics",
        "@rpath/CoreGraphics.dylib",
    ),
    (
        "/System/Library/Frameworks/CoreVideo.framework/Versions/A/CoreVideo",
        "@rpath/CoreVideo.dylib",
    ),
];

/// Transforms one Mach-O executable into a loadable dylib at a derived path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patcher {
    source: PathBuf,
    output: PathBuf,
}

impl Patcher {
    /// Creates a patcher whose output is the source file name with a
    /// `.dylib` suffix appended, alongside the source.
    pub fn new<P: AsRef<Path>>(source: P) -> Self {
        let source = source.as_ref().to_path_buf();
        let mut name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".dylib");
        let output = source.with_file_name(name);
        Self { source, output }
    }

    /// Redirects the output into `dir`, keeping the derived file name.
    pub fn with_output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        if let Some(name) = self.output.file_name() {
            self.output = dir.as_ref().join(name);
        }
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Runs the full pipeline: convert to dylib, rewrite the platform,
    /// strip the default undefined symbols, remap known dependencies, and
    /// mark the output executable. Returns the output path.
    pub fn patch(&self, target_platform: u32) -> Result<PathBuf> {
        self.copy_source(true)?;
        self.convert_to_dylib(true)?;
        self.patch_platform(target_platform)?;
        self.remove_undefined_symbols(&[])?;
        self.patch_known_dependencies(&[])?;
        self.set_output_permissions()?;
        info!(output = %self.output.display(), "Patch pipeline complete");
        Ok(self.output.clone())
    }

    /// Copies the source to the output path. With `overwrite`, an existing
    /// output is replaced; otherwise an existing output is kept so a
    /// later pipeline step can continue from it.
    fn copy_source(&self, overwrite: bool) -> Result<()> {
        if self.output.exists() {
            if !overwrite {
                return Ok(());
            }
            std::fs::remove_file(&self.output)?;
        }
        std::fs::copy(&self.source, &self.output)?;
        Ok(())
    }

    /// Converts the output copy's ARM64 slice into dylib form. The recorded
    /// identity is the output file's base name.
    pub fn convert_to_dylib(&self, inject: bool) -> Result<()> {
        self.copy_source(false)?;

        let identity = self
            .output
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidPath(self.output.display().to_string()))?
            .to_owned();

        let mut map = FileMap::open_rw(&self.output)?;
        let slice_offset = arch_slice_offset(map.bytes(), CPU_TYPE_ARM64)? as usize;
        macho::convert_to_dylib(map.bytes_mut(), slice_offset, &identity, inject)?;
        map.flush()
    }

    /// Rewrites build-version platform fields across all slices of the
    /// output copy.
    pub fn patch_platform(&self, target_platform: u32) -> Result<bool> {
        self.copy_source(false)?;

        let mut map = FileMap::open_rw(&self.output)?;
        let found = macho::patch_platform(map.bytes_mut(), target_platform)?;
        map.flush()?;
        Ok(found)
    }

    /// Strips the default undefined-symbol list plus `extra` from the
    /// output copy's ARM64 slice. Returns the number removed.
    pub fn remove_undefined_symbols(&self, extra: &[&str]) -> Result<u32> {
        self.copy_source(false)?;

        let mut names: Vec<&str> = DEFAULT_SYMBOLS_TO_REMOVE.to_vec();
        names.extend_from_slice(extra);

        let mut map = FileMap::open_rw(&self.output)?;
        let slice_offset = arch_slice_offset(map.bytes(), CPU_TYPE_ARM64)? as usize;
        let removed = macho::remove_undefined_symbols(map.bytes_mut(), slice_offset, &names)?;
        map.flush()?;
        Ok(removed)
    }

    /// Sets the weak-definition bit on the named symbols in the output
    /// copy's ARM64 slice. Returns the number weakened.
    pub fn weaken_symbols(&self, names: &[&str]) -> Result<u32> {
        self.copy_source(false)?;

        let mut map = FileMap::open_rw(&self.output)?;
        let slice_offset = arch_slice_offset(map.bytes(), CPU_TYPE_ARM64)? as usize;
        let weakened = macho::weaken_symbols(map.bytes_mut(), slice_offset, names)?;
        map.flush()?;
        Ok(weakened)
    }

    /// Applies the built-in dependency remap table plus `extra` pairs to
    /// the raw output bytes. A pair whose replacement is over-length is
    /// skipped with a warning rather than aborting the remaining pairs.
    pub fn patch_known_dependencies(&self, extra: &[(&str, &str)]) -> Result<()> {
        self.copy_source(false)?;

        let mut map = FileMap::open_rw(&self.output)?;
        for (pattern, replacement) in KNOWN_DEPENDENCY_REMAPS.iter().chain(extra) {
            match macho::replace_pattern(
                map.bytes_mut(),
                pattern.as_bytes(),
                replacement.as_bytes(),
            ) {
                Ok(_) => {}
                Err(e @ Error::ReplacementTooLong { .. }) => {
                    warn!(pattern = %pattern, replacement = %replacement, error = %e, "Skipping remap pair");
                }
                Err(e) => return Err(e),
            }
        }
        map.flush()
    }

    /// Marks the output executable/readable/writable (0755).
    fn set_output_permissions(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o755);
            std::fs::set_permissions(&self.output, perms)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_appends_dylib_suffix() {
        let patcher = Patcher::new("/tmp/work/zsh");
        assert_eq!(patcher.output(), Path::new("/tmp/work/zsh.dylib"));

        let patcher = Patcher::new("/tmp/work/zsh").with_output_dir("/tmp/out");
        assert_eq!(patcher.output(), Path::new("/tmp/out/zsh.dylib"));
    }

    #[test]
    fn built_in_remaps_are_length_safe() {
        for (pattern, replacement) in KNOWN_DEPENDENCY_REMAPS {
            assert!(
                replacement.len() <= pattern.len(),
                "remap for {pattern} would grow the file"
            );
        }
    }

    #[test]
    fn missing_source_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let patcher = Patcher::new(dir.path().join("absent"));
        assert!(matches!(
            patcher.convert_to_dylib(true),
            Err(Error::Io(_))
        ));
    }
}
