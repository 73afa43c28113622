//! Read-only ELF image reader.
//!
//! Opens a file, maps it read-only, validates the ELF header, and exposes
//! typed views of the program-header table, section-header table, and the
//! section-name string table. Pure parse: nothing here mutates the
//! process address space beyond the private read-only view, which is
//! released when the image is dropped (normally once the live mapping
//! exists).

use std::fmt;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;

use minilinker_core::elf::{
    DynamicInfo, Elf64Header, Elf64ProgramHeader, Elf64SectionHeader, ElfError,
    parse_dynamic_entries,
    program::parse_program_headers,
    section::parse_section_headers,
    symbol::get_string,
};
use serde::Serialize;

use crate::error::{LinkerError, LinkerResult};

/// Whole-file private read-only mapping.
#[derive(Debug)]
struct FileView {
    addr: *mut u8,
    len: usize,
}

impl FileView {
    fn map(file: &File, len: usize, path: &Path) -> LinkerResult<Self> {
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(LinkerError::MapFailure(format!(
                "mmap {}: {}",
                path.display(),
                io::Error::last_os_error()
            )));
        }
        Ok(Self {
            addr: addr.cast(),
            len,
        })
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.addr, self.len) }
    }
}

impl Drop for FileView {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.addr.cast(), self.len);
        }
    }
}

/// An opened, validated, but not yet loaded ELF object.
#[derive(Debug)]
pub struct ElfImage {
    name: String,
    file: File,
    view: FileView,
    header: Elf64Header,
    program_headers: Vec<Elf64ProgramHeader>,
    section_headers: Vec<Elf64SectionHeader>,
}

impl ElfImage {
    /// Open `path` read-only, map the whole file, and validate that it is
    /// a little-endian ELF64 shared object or executable for x86_64.
    pub fn open(path: &Path) -> LinkerResult<Self> {
        let file = File::open(path)
            .map_err(|e| LinkerError::Internal(format!("open {}: {e}", path.display())))?;
        let len = file
            .metadata()
            .map_err(|e| LinkerError::Internal(format!("stat {}: {e}", path.display())))?
            .len() as usize;
        if len < Elf64Header::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Elf64Header::SIZE,
                available: len,
            }
            .into());
        }

        let view = FileView::map(&file, len, path)?;
        let header = Elf64Header::parse(view.bytes())?;
        header.validate_for_loading()?;

        let program_headers = parse_program_headers(
            view.bytes(),
            header.e_phoff,
            header.e_phentsize,
            header.e_phnum,
        )?;

        let section_headers = if header.e_shoff != 0 && header.e_shnum != 0 {
            parse_section_headers(
                view.bytes(),
                header.e_shoff,
                header.e_shentsize,
                header.e_shnum,
            )?
        } else {
            Vec::new()
        };

        Ok(Self {
            name: path.display().to_string(),
            file,
            view,
            header,
            program_headers,
            section_headers,
        })
    }

    /// The path this image was opened from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing file, used by the segment mapper for overlays.
    pub(crate) fn file(&self) -> &File {
        &self.file
    }

    /// The on-disk bytes.
    pub fn data(&self) -> &[u8] {
        self.view.bytes()
    }

    /// The validated ELF header.
    pub fn header(&self) -> &Elf64Header {
        &self.header
    }

    /// The program-header table.
    pub fn program_headers(&self) -> &[Elf64ProgramHeader] {
        &self.program_headers
    }

    /// The section-header table (may be empty).
    pub fn section_headers(&self) -> &[Elf64SectionHeader] {
        &self.section_headers
    }

    /// Resolve a section's name through the section-name string table.
    pub fn section_name(&self, section: &Elf64SectionHeader) -> Option<&str> {
        let shstr = self
            .section_headers
            .get(self.header.e_shstrndx as usize)?
            .file_range(self.data().len())?;
        get_string(&self.data()[shstr], section.sh_name).ok()
    }

    /// Find a section by name.
    pub fn find_section(&self, name: &str) -> Option<&Elf64SectionHeader> {
        self.section_headers
            .iter()
            .find(|sh| self.section_name(sh) == Some(name))
    }

    /// Translate an image-relative virtual address to a file offset via
    /// the loadable segment containing it.
    pub fn vaddr_to_offset(&self, vaddr: u64) -> Option<u64> {
        self.program_headers
            .iter()
            .filter(|ph| ph.is_load())
            .find(|ph| vaddr >= ph.p_vaddr && vaddr < ph.p_vaddr + ph.p_filesz)
            .map(|ph| vaddr - ph.p_vaddr + ph.p_offset)
    }

    /// Interpret the dynamic array from the file view, when present.
    pub fn dynamic_info(&self) -> Option<DynamicInfo> {
        let dyn_phdr = self.program_headers.iter().find(|ph| ph.is_dynamic())?;
        let start = self.vaddr_to_offset(dyn_phdr.p_vaddr)? as usize;
        let end = start.checked_add(dyn_phdr.p_filesz as usize)?;
        let bytes = self.data().get(start..end)?;
        Some(DynamicInfo::collect(&parse_dynamic_entries(bytes)))
    }

    /// Diagnostic summary of the image (header, segments, sections,
    /// needed libraries).
    pub fn summary(&self) -> ImageSummary {
        let dynamic = self.dynamic_info();
        let needed = match &dynamic {
            Some(info) => info
                .needed
                .iter()
                .filter_map(|&off| self.needed_name(info, off))
                .collect(),
            None => Vec::new(),
        };

        ImageSummary {
            name: self.name.clone(),
            object_type: if self.header.is_shared_object() {
                "Shared Object".into()
            } else {
                "Executable".into()
            },
            machine: "x86_64".into(),
            entry: self.header.e_entry,
            segments: self
                .program_headers
                .iter()
                .map(|ph| SegmentSummary {
                    kind: ph.p_type.name().into(),
                    offset: ph.p_offset,
                    vaddr: ph.p_vaddr,
                    filesz: ph.p_filesz,
                    memsz: ph.p_memsz,
                    flags: ph.p_flags.display().iter().collect(),
                })
                .collect(),
            sections: self
                .section_headers
                .iter()
                .map(|sh| SectionSummary {
                    name: self.section_name(sh).unwrap_or("").into(),
                    addr: sh.sh_addr,
                    size: sh.sh_size,
                })
                .collect(),
            needed,
            rela_count: dynamic.as_ref().map_or(0, |d| d.rela_count),
            plt_rela_count: dynamic.as_ref().map_or(0, |d| d.plt_rela_count),
        }
    }

    fn needed_name(&self, info: &DynamicInfo, name_offset: u64) -> Option<String> {
        let strtab_off = self.vaddr_to_offset(info.strtab?)? as usize;
        let size = info.strtab_size as usize;
        let strtab = self.data().get(strtab_off..strtab_off.checked_add(size)?)?;
        get_string(strtab, name_offset as u32).ok().map(Into::into)
    }
}

/// Printable/serializable digest of an image's structure.
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub name: String,
    pub object_type: String,
    pub machine: String,
    pub entry: u64,
    pub segments: Vec<SegmentSummary>,
    pub sections: Vec<SectionSummary>,
    pub needed: Vec<String>,
    pub rela_count: usize,
    pub plt_rela_count: usize,
}

/// One program-header row of the summary.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSummary {
    pub kind: String,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub flags: String,
}

/// One section row of the summary.
#[derive(Debug, Clone, Serialize)]
pub struct SectionSummary {
    pub name: String,
    pub addr: u64,
    pub size: u64,
}

impl fmt::Display for ImageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== ELF Header ===")?;
        writeln!(f, "Type: {}", self.object_type)?;
        writeln!(f, "Machine: {}", self.machine)?;
        writeln!(f, "Entry: {:#x}", self.entry)?;
        writeln!(f, "Program headers: {}", self.segments.len())?;
        writeln!(f, "Section headers: {}", self.sections.len())?;

        writeln!(f, "\n=== Program Headers ===")?;
        for (i, seg) in self.segments.iter().enumerate() {
            writeln!(
                f,
                "[{i:2}] {:<12} offset={:#010x} vaddr={:#010x} filesz={:#08x} memsz={:#08x} flags={}",
                seg.kind, seg.offset, seg.vaddr, seg.filesz, seg.memsz, seg.flags
            )?;
        }

        if !self.needed.is_empty() {
            writeln!(f, "\n=== Needed (not resolved by this loader) ===")?;
            for lib in &self.needed {
                writeln!(f, "  {lib}")?;
            }
        }

        writeln!(
            f,
            "\nRelocations: rela={} plt_rela={}",
            self.rela_count, self.plt_rela_count
        )?;

        writeln!(f, "\n=== Sections ===")?;
        for (i, sec) in self.sections.iter().enumerate() {
            writeln!(
                f,
                "[{i:2}] {:<20} addr={:#010x} size={:#08x}",
                sec.name, sec.addr, sec.size
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_temp(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("minilinker-image-{}-{name}", std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        // Large enough to pass the size check, so the magic check fires.
        let path = write_temp("badmagic", &[0x42u8; 128]);
        let err = ElfImage::open(&path).unwrap_err();
        assert!(matches!(err, LinkerError::BadFormat(_)));
        assert!(format!("{err}").contains("invalid ELF magic"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_open_rejects_truncated() {
        let path = write_temp("truncated", &[0x7f, b'E', b'L', b'F']);
        let err = ElfImage::open(&path).unwrap_err();
        assert!(matches!(err, LinkerError::BadFormat(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_open_missing_file() {
        let err = ElfImage::open(Path::new("/nonexistent/minilinker-test.so")).unwrap_err();
        assert!(matches!(err, LinkerError::Internal(_)));
    }

    #[test]
    fn test_open_system_libc() {
        let candidates = [
            "/lib/x86_64-linux-gnu/libc.so.6",
            "/lib64/libc.so.6",
            "/usr/lib/x86_64-linux-gnu/libc.so.6",
        ];
        let Some(path) = candidates.iter().find(|p| Path::new(p).exists()) else {
            eprintln!("Skipping: no libc.so.6 found");
            return;
        };

        let image = ElfImage::open(Path::new(path)).unwrap();
        assert!(image.header().is_shared_object() || image.header().is_executable());
        assert!(!image.program_headers().is_empty());

        let summary = image.summary();
        assert!(summary.segments.iter().any(|s| s.kind == "LOAD"));
        let rendered = format!("{summary}");
        assert!(rendered.contains("=== Program Headers ==="));
    }
}
