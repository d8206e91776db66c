//! Platform rewriting and raw byte-pattern substitution.
//!
//! The platform patch retargets build-version commands across every slice
//! of a (possibly fat) binary. Pattern substitution retargets known
//! dependency paths without ever changing the file length.

use crate::error::{Error, Result};
use crate::macho::commands::LoadCommandIter;
use crate::macho::fat::all_slice_offsets;
use crate::macho::types::{BuildVersionCommand, LC_BUILD_VERSION};
use memchr::memmem;
use tracing::{debug, warn};

/// Overwrites the platform field of every build-version command in every
/// slice of the binary.
///
/// Returns whether at least one command was patched; finding none is
/// reported but not fatal. A slice whose header fails to decode is skipped
/// with a warning, matching per-slice error containment.
pub fn patch_platform(data: &mut [u8], target_platform: u32) -> Result<bool> {
    let mut found_any = false;

    for slice_offset in all_slice_offsets(data)? {
        match patch_slice_platform(data, slice_offset as usize, target_platform) {
            Ok(found) => found_any = found_any || found,
            Err(e) => {
                warn!(offset = slice_offset, error = %e, "Failed to patch slice");
            }
        }
    }

    if !found_any {
        warn!("No LC_BUILD_VERSION found in any slice");
    }

    Ok(found_any)
}

fn patch_slice_platform(data: &mut [u8], slice_offset: usize, target: u32) -> Result<bool> {
    let mut found = false;
    let mut build_versions = Vec::new();

    for item in LoadCommandIter::from_slice(data, slice_offset)? {
        let cmd = item?;
        if cmd.cmd == LC_BUILD_VERSION {
            build_versions.push(cmd.offset);
        }
    }

    for offset in build_versions {
        let build = BuildVersionCommand::decode(data, offset)?;
        debug!(
            from = build.platform,
            to = target,
            offset,
            "Patching platform"
        );
        BuildVersionCommand::write_platform(data, offset, target)?;
        found = true;
    }

    Ok(found)
}

/// Replaces every non-overlapping occurrence of `pattern` with
/// `replacement`, left to right, zero-padding the remainder so the file
/// length never changes. Returns the number of substitutions made.
///
/// A replacement longer than its pattern is rejected: growing the file would
/// invalidate every subsequent file offset.
pub fn replace_pattern(data: &mut [u8], pattern: &[u8], replacement: &[u8]) -> Result<usize> {
    if replacement.len() > pattern.len() {
        return Err(Error::ReplacementTooLong {
            pattern: pattern.len(),
            replacement: replacement.len(),
        });
    }
    if pattern.is_empty() {
        return Ok(0);
    }

    let finder = memmem::Finder::new(pattern);
    let mut count = 0usize;
    let mut start = 0usize;

    while let Some(pos) = finder.find(&data[start..]) {
        let at = start + pos;
        data[at..at + replacement.len()].copy_from_slice(replacement);
        data[at + replacement.len()..at + pattern.len()].fill(0);
        count += 1;
        start = at + pattern.len();
    }

    if count > 0 {
        debug!(count, "Pattern substituted");
    }
    Ok(count)
}
