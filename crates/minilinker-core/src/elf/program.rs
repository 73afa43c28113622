//! ELF64 program header parsing.
//!
//! Program headers describe the segments a loader must realize: loadable
//! ranges, the dynamic array, and the table's own self-descriptor.

use super::{ElfError, ElfResult};

/// Program header type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramType {
    /// Unused entry
    Null,
    /// Loadable segment
    Load,
    /// Dynamic linking information
    Dynamic,
    /// Interpreter path
    Interp,
    /// Auxiliary information
    Note,
    /// Reserved (unused)
    Shlib,
    /// Program header table
    Phdr,
    /// Thread-local storage template
    Tls,
    /// GNU stack permissions
    GnuStack,
    /// GNU relocation read-only
    GnuRelro,
    /// GNU property
    GnuProperty,
    /// GNU exception handling
    GnuEhFrame,
    /// Unknown type
    Unknown(u32),
}

impl From<u32> for ProgramType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::Load,
            2 => Self::Dynamic,
            3 => Self::Interp,
            4 => Self::Note,
            5 => Self::Shlib,
            6 => Self::Phdr,
            7 => Self::Tls,
            0x6474_e550 => Self::GnuEhFrame,
            0x6474_e551 => Self::GnuStack,
            0x6474_e552 => Self::GnuRelro,
            0x6474_e553 => Self::GnuProperty,
            other => Self::Unknown(other),
        }
    }
}

impl ProgramType {
    /// Short name used in diagnostic listings.
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Load => "LOAD",
            Self::Dynamic => "DYNAMIC",
            Self::Interp => "INTERP",
            Self::Note => "NOTE",
            Self::Shlib => "SHLIB",
            Self::Phdr => "PHDR",
            Self::Tls => "TLS",
            Self::GnuStack => "GNU_STACK",
            Self::GnuRelro => "GNU_RELRO",
            Self::GnuProperty => "GNU_PROPERTY",
            Self::GnuEhFrame => "GNU_EH_FRAME",
            Self::Unknown(_) => "OTHER",
        }
    }
}

/// Program header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramFlags(pub u32);

impl ProgramFlags {
    /// Execute permission
    pub const PF_X: u32 = 0x1;
    /// Write permission
    pub const PF_W: u32 = 0x2;
    /// Read permission
    pub const PF_R: u32 = 0x4;

    /// Check if executable.
    pub fn is_executable(self) -> bool {
        self.0 & Self::PF_X != 0
    }

    /// Check if writable.
    pub fn is_writable(self) -> bool {
        self.0 & Self::PF_W != 0
    }

    /// Check if readable.
    pub fn is_readable(self) -> bool {
        self.0 & Self::PF_R != 0
    }

    /// Convert to mmap protection flags.
    ///
    /// ELF and mmap encode the same three permissions with different bit
    /// positions (PF_R=0x4 vs PROT_READ=0x1 and so on).
    pub fn to_mmap_prot(self) -> i32 {
        const PROT_READ: i32 = 0x1;
        const PROT_WRITE: i32 = 0x2;
        const PROT_EXEC: i32 = 0x4;

        let mut prot = 0i32;
        if self.is_readable() {
            prot |= PROT_READ;
        }
        if self.is_writable() {
            prot |= PROT_WRITE;
        }
        if self.is_executable() {
            prot |= PROT_EXEC;
        }
        prot
    }

    /// Render as the conventional "rwx" triple, e.g. `R-X`.
    pub fn display(self) -> [char; 3] {
        [
            if self.is_readable() { 'R' } else { '-' },
            if self.is_writable() { 'W' } else { '-' },
            if self.is_executable() { 'X' } else { '-' },
        ]
    }
}

/// ELF64 program header.
#[derive(Debug, Clone, Copy)]
pub struct Elf64ProgramHeader {
    /// Segment type
    pub p_type: ProgramType,
    /// Segment flags
    pub p_flags: ProgramFlags,
    /// File offset of segment
    pub p_offset: u64,
    /// Virtual address in memory
    pub p_vaddr: u64,
    /// Physical address (usually same as vaddr)
    pub p_paddr: u64,
    /// Size in file
    pub p_filesz: u64,
    /// Size in memory (may be larger than filesz for BSS)
    pub p_memsz: u64,
    /// Alignment (must be power of 2)
    pub p_align: u64,
}

impl Elf64ProgramHeader {
    /// Size of an ELF64 program header in bytes.
    pub const SIZE: usize = 56;

    /// Parse a program header from a byte slice.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }

        let read_u32 =
            |off: usize| u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]);
        let read_u64 = |off: usize| {
            u64::from_le_bytes([
                data[off],
                data[off + 1],
                data[off + 2],
                data[off + 3],
                data[off + 4],
                data[off + 5],
                data[off + 6],
                data[off + 7],
            ])
        };

        Ok(Self {
            p_type: ProgramType::from(read_u32(0)),
            p_flags: ProgramFlags(read_u32(4)),
            p_offset: read_u64(8),
            p_vaddr: read_u64(16),
            p_paddr: read_u64(24),
            p_filesz: read_u64(32),
            p_memsz: read_u64(40),
            p_align: read_u64(48),
        })
    }

    /// Check if this is a loadable segment.
    pub fn is_load(&self) -> bool {
        matches!(self.p_type, ProgramType::Load)
    }

    /// Check if this is the dynamic segment.
    pub fn is_dynamic(&self) -> bool {
        matches!(self.p_type, ProgramType::Dynamic)
    }

    /// Check if this is the program-header self-descriptor.
    pub fn is_phdr(&self) -> bool {
        matches!(self.p_type, ProgramType::Phdr)
    }

    /// Get the BSS size (memory size beyond file size).
    pub fn bss_size(&self) -> u64 {
        self.p_memsz.saturating_sub(self.p_filesz)
    }

    /// Check alignment validity.
    pub fn is_valid_alignment(&self) -> bool {
        self.p_align == 0 || self.p_align.is_power_of_two()
    }
}

/// Parse all program headers from an ELF file.
pub fn parse_program_headers(
    data: &[u8],
    phoff: u64,
    phentsize: u16,
    phnum: u16,
) -> ElfResult<Vec<Elf64ProgramHeader>> {
    let phoff = phoff as usize;
    let phentsize = phentsize as usize;
    let phnum = phnum as usize;

    let end_offset = phoff
        .checked_add(
            phentsize
                .checked_mul(phnum)
                .ok_or(ElfError::InvalidOffset {
                    kind: "program header table",
                    offset: phoff as u64,
                })?,
        )
        .ok_or(ElfError::InvalidOffset {
            kind: "program header table",
            offset: phoff as u64,
        })?;

    if end_offset > data.len() {
        return Err(ElfError::BufferTooSmall {
            needed: end_offset,
            available: data.len(),
        });
    }
    if phnum > 0 && phentsize < Elf64ProgramHeader::SIZE {
        return Err(ElfError::InvalidOffset {
            kind: "program header entry size",
            offset: phentsize as u64,
        });
    }

    let mut headers = Vec::with_capacity(phnum);
    for i in 0..phnum {
        let offset = phoff + i * phentsize;
        headers.push(Elf64ProgramHeader::parse(&data[offset..])?);
    }

    Ok(headers)
}

/// Compute the virtual-address span covered by the loadable segments:
/// the smallest `p_vaddr` and the largest `p_vaddr + p_memsz`.
///
/// Page rounding is the mapper's concern; the raw span is returned here.
/// Returns an error when no loadable segment exists.
pub fn load_span(headers: &[Elf64ProgramHeader]) -> ElfResult<(u64, u64)> {
    let mut min_vaddr = u64::MAX;
    let mut max_vaddr = 0u64;

    for ph in headers.iter().filter(|ph| ph.is_load()) {
        min_vaddr = min_vaddr.min(ph.p_vaddr);
        max_vaddr = max_vaddr.max(ph.p_vaddr.saturating_add(ph.p_memsz));
    }

    if min_vaddr > max_vaddr {
        return Err(ElfError::NoLoadableSegments);
    }
    Ok((min_vaddr, max_vaddr))
}
