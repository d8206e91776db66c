//! End-to-end transformation over real files.

mod common;

use common::ExecBuilder;
use dylibize::loader::absolute_entry_address;
use dylibize::macho::types::*;
use dylibize::macho::utils::read_cstr;
use dylibize::macho::{
    resolve_entry_point, text_segment_vmaddr, DylibCommand, LoadCommandIter,
    RUNTIME_SUPPORT_DYLIB,
};
use dylibize::Patcher;
use std::path::PathBuf;

fn write_exec(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn commands_of(data: &[u8], tag: u32) -> Vec<(usize, u32)> {
    LoadCommandIter::from_slice(data, 0)
        .unwrap()
        .map(|c| c.unwrap())
        .filter(|c| c.cmd == tag)
        .map(|c| (c.offset, c.cmdsize))
        .collect()
}

#[test]
fn minimal_executable_becomes_loadable_dylib() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_exec(&dir, "prog", &ExecBuilder::new().build());

    let patcher = Patcher::new(&source);
    let output = patcher.patch(PLATFORM_IOS).unwrap();
    assert_eq!(output, dir.path().join("prog.dylib"));

    let data = std::fs::read(&output).unwrap();

    // Header rewritten: dylib file type, PIE cleared.
    let header = MachHeader64::decode(&data, 0).unwrap();
    assert_eq!(header.filetype, MH_DYLIB);
    assert!(!header.flags.contains(HeaderFlags::PIE));
    assert!(header.flags.contains(HeaderFlags::NO_REEXPORTED_DYLIBS));

    // Exactly one new identity and one new dependency command, 8-aligned.
    let identities = commands_of(&data, LC_ID_DYLIB);
    assert_eq!(identities.len(), 1);
    let dependencies = commands_of(&data, LC_LOAD_DYLIB);
    assert_eq!(dependencies.len(), 1);
    for (_, cmdsize) in identities.iter().chain(&dependencies) {
        assert_eq!(cmdsize % 8, 0);
    }

    let (id_offset, _) = identities[0];
    let id = DylibCommand::decode(&data, id_offset).unwrap();
    assert_eq!(
        read_cstr(&data, id_offset + id.name_offset as usize).unwrap(),
        "prog.dylib"
    );
    let (dep_offset, _) = dependencies[0];
    let dep = DylibCommand::decode(&data, dep_offset).unwrap();
    assert_eq!(
        read_cstr(&data, dep_offset + dep.name_offset as usize).unwrap(),
        RUNTIME_SUPPORT_DYLIB
    );

    // Static metadata survives transformation; resolving against a runtime
    // base of 0x100c00000 lands at 0x100c04000.
    let entry = resolve_entry_point(&data, CPU_TYPE_ARM64).unwrap();
    assert_eq!(entry.entry_offset, 0x4000);
    let vmaddr = text_segment_vmaddr(&data, CPU_TYPE_ARM64).unwrap();
    assert_eq!(vmaddr, 0x1_0000_0000);
    let address = absolute_entry_address(vmaddr, entry.entry_offset, 0x1_00c0_0000).unwrap();
    assert_eq!(address, 0x1_00c0_4000);

    // Output marked executable.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&output).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}

#[test]
fn source_file_is_never_mutated() {
    let dir = tempfile::tempdir().unwrap();
    let original = ExecBuilder::new().pagezero().build();
    let source = write_exec(&dir, "prog", &original);

    Patcher::new(&source).patch(PLATFORM_IOS).unwrap();

    assert_eq!(std::fs::read(&source).unwrap(), original);
}

#[test]
fn pagezero_is_shrunk_to_guard_region() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_exec(&dir, "prog", &ExecBuilder::new().pagezero().build());

    let patcher = Patcher::new(&source);
    patcher.convert_to_dylib(true).unwrap();

    // The identity insertion shifts the command block, so locate the
    // segment by name rather than by a fixed offset.
    let data = std::fs::read(patcher.output()).unwrap();
    let seg = commands_of(&data, LC_SEGMENT_64)
        .iter()
        .map(|(offset, _)| SegmentCommand64::decode(&data, *offset).unwrap())
        .find(|s| s.name() == "__PAGEZERO")
        .unwrap();
    assert_eq!(seg.vmaddr, PAGEZERO_VMSIZE - PAGEZERO_GUARD_SIZE);
    assert_eq!(seg.vmsize, PAGEZERO_GUARD_SIZE);
}

#[test]
fn repeated_conversion_does_not_duplicate_commands() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_exec(&dir, "prog", &ExecBuilder::new().build());

    let patcher = Patcher::new(&source);
    patcher.convert_to_dylib(true).unwrap();
    let after_first = MachHeader64::decode(&std::fs::read(patcher.output()).unwrap(), 0)
        .unwrap()
        .ncmds;

    patcher.convert_to_dylib(true).unwrap();
    let data = std::fs::read(patcher.output()).unwrap();
    assert_eq!(MachHeader64::decode(&data, 0).unwrap().ncmds, after_first);
    assert_eq!(commands_of(&data, LC_LOAD_DYLIB).len(), 1);
    assert_eq!(commands_of(&data, LC_ID_DYLIB).len(), 1);
}

#[test]
fn platform_is_rewritten_by_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_exec(
        &dir,
        "prog",
        &ExecBuilder::new().build_platform(PLATFORM_MACOS).build(),
    );

    let patcher = Patcher::new(&source);
    patcher.patch(PLATFORM_IOSSIMULATOR).unwrap();

    let data = std::fs::read(patcher.output()).unwrap();
    let (offset, _) = commands_of(&data, LC_BUILD_VERSION)[0];
    let build = BuildVersionCommand::decode(&data, offset).unwrap();
    assert_eq!(build.platform, PLATFORM_IOSSIMULATOR);
}

#[test]
fn known_dependency_paths_are_remapped_without_resizing() {
    let dir = tempfile::tempdir().unwrap();
    let exec = ExecBuilder::new()
        .embed(b"/usr/lib/libSystem.B.dylib\0")
        .build();
    let original_len = exec.len();
    let source = write_exec(&dir, "prog", &exec);

    let patcher = Patcher::new(&source);
    patcher.patch(PLATFORM_IOS).unwrap();

    let data = std::fs::read(patcher.output()).unwrap();
    assert_eq!(data.len(), original_len);
    assert!(data
        .windows(b"@rpath/LIBSYSTEM.dylib".len())
        .any(|w| w == b"@rpath/LIBSYSTEM.dylib"));
    assert!(!data
        .windows(b"/usr/lib/libSystem.B.dylib".len())
        .any(|w| w == b"/usr/lib/libSystem.B.dylib"));
}

#[test]
fn caller_supplied_remap_pairs_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_exec(
        &dir,
        "prog",
        &ExecBuilder::new().embed(b"/custom/lib/libx.dylib\0").build(),
    );

    let patcher = Patcher::new(&source);
    patcher.convert_to_dylib(true).unwrap();
    patcher
        .patch_known_dependencies(&[("/custom/lib/libx.dylib", "@rpath/libx.dylib")])
        .unwrap();

    let data = std::fs::read(patcher.output()).unwrap();
    assert!(data
        .windows(b"@rpath/libx.dylib".len())
        .any(|w| w == b"@rpath/libx.dylib"));
}
