//! Synthetic Mach-O builders shared by integration tests.

use dylibize::macho::types::*;
use dylibize::macho::utils::{Endian, EndianWrite};

/// Builder for a minimal thin ARM64 Mach-O executable.
pub struct ExecBuilder {
    pagezero: bool,
    text_vmaddr: u64,
    entry_offset: u64,
    build_platform: Option<u32>,
    embedded: Vec<u8>,
}

impl Default for ExecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecBuilder {
    pub fn new() -> Self {
        Self {
            pagezero: false,
            text_vmaddr: 0x1_0000_0000,
            entry_offset: 0x4000,
            build_platform: None,
            embedded: Vec::new(),
        }
    }

    pub fn pagezero(mut self) -> Self {
        self.pagezero = true;
        self
    }

    pub fn build_platform(mut self, platform: u32) -> Self {
        self.build_platform = Some(platform);
        self
    }

    /// Raw bytes placed in the padding past the load commands, standing in
    /// for section content such as embedded dependency paths.
    pub fn embed(mut self, bytes: &[u8]) -> Self {
        self.embedded.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut cmds: Vec<Vec<u8>> = Vec::new();

        if self.pagezero {
            let mut seg = vec![0u8; SEGMENT_COMMAND_64_SIZE];
            seg.write_u32(0, LC_SEGMENT_64, Endian::Little).unwrap();
            seg.write_u32(4, SEGMENT_COMMAND_64_SIZE as u32, Endian::Little)
                .unwrap();
            seg[8..18].copy_from_slice(b"__PAGEZERO");
            seg.write_u64(32, PAGEZERO_VMSIZE, Endian::Little).unwrap();
            cmds.push(seg);
        }

        let mut text = vec![0u8; SEGMENT_COMMAND_64_SIZE];
        text.write_u32(0, LC_SEGMENT_64, Endian::Little).unwrap();
        text.write_u32(4, SEGMENT_COMMAND_64_SIZE as u32, Endian::Little)
            .unwrap();
        text[8..14].copy_from_slice(b"__TEXT");
        text.write_u64(24, self.text_vmaddr, Endian::Little).unwrap();
        text.write_u64(32, 0x8000, Endian::Little).unwrap();
        text.write_u64(48, 0x8000, Endian::Little).unwrap();
        cmds.push(text);

        if let Some(platform) = self.build_platform {
            let mut build = vec![0u8; 24];
            build.write_u32(0, LC_BUILD_VERSION, Endian::Little).unwrap();
            build.write_u32(4, 24, Endian::Little).unwrap();
            build.write_u32(8, platform, Endian::Little).unwrap();
            cmds.push(build);
        }

        let mut main_cmd = vec![0u8; 24];
        main_cmd.write_u32(0, LC_MAIN, Endian::Little).unwrap();
        main_cmd.write_u32(4, 24, Endian::Little).unwrap();
        main_cmd.write_u64(8, self.entry_offset, Endian::Little).unwrap();
        cmds.push(main_cmd);

        let sizeofcmds: usize = cmds.iter().map(Vec::len).sum();
        // Generous padding after the command table, as linkers leave before
        // the first section.
        let mut buf = vec![0u8; MACH_HEADER_64_SIZE + sizeofcmds + 0x400];

        let header = MachHeader64 {
            magic: MH_MAGIC_64,
            cputype: CPU_TYPE_ARM64,
            cpusubtype: 0,
            filetype: MH_EXECUTE,
            ncmds: cmds.len() as u32,
            sizeofcmds: sizeofcmds as u32,
            flags: HeaderFlags::PIE,
            reserved: 0,
        };
        header.encode_at(&mut buf, 0).unwrap();

        let mut pos = MACH_HEADER_64_SIZE;
        for cmd in &cmds {
            buf[pos..pos + cmd.len()].copy_from_slice(cmd);
            pos += cmd.len();
        }

        if !self.embedded.is_empty() {
            let at = buf.len() - self.embedded.len() - 16;
            buf[at..at + self.embedded.len()].copy_from_slice(&self.embedded);
        }

        buf
    }
}
