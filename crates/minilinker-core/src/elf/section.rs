//! ELF64 section header parsing.
//!
//! The loader only consumes section headers for diagnostics (listing
//! names, addresses, and sizes) and for locating tables in the on-disk
//! file view; runtime linking works from program headers and the dynamic
//! array alone.

use super::{ElfError, ElfResult};

/// Section header type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    /// Inactive section
    Null,
    /// Program data
    Progbits,
    /// Symbol table
    Symtab,
    /// String table
    Strtab,
    /// Relocation with addends
    Rela,
    /// Symbol hash table
    Hash,
    /// Dynamic linking information
    Dynamic,
    /// Notes
    Note,
    /// Uninitialized data (BSS)
    Nobits,
    /// Relocation without addends
    Rel,
    /// Dynamic linker symbol table
    Dynsym,
    /// Array of constructors
    InitArray,
    /// Array of destructors
    FiniArray,
    /// GNU hash table
    GnuHash,
    /// Unknown type
    Unknown(u32),
}

impl From<u32> for SectionType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::Progbits,
            2 => Self::Symtab,
            3 => Self::Strtab,
            4 => Self::Rela,
            5 => Self::Hash,
            6 => Self::Dynamic,
            7 => Self::Note,
            8 => Self::Nobits,
            9 => Self::Rel,
            11 => Self::Dynsym,
            14 => Self::InitArray,
            15 => Self::FiniArray,
            0x6fff_fff6 => Self::GnuHash,
            other => Self::Unknown(other),
        }
    }
}

/// ELF64 section header.
#[derive(Debug, Clone, Copy)]
pub struct Elf64SectionHeader {
    /// Section name (index into the section-name string table)
    pub sh_name: u32,
    /// Section type
    pub sh_type: SectionType,
    /// Section flags
    pub sh_flags: u64,
    /// Virtual address in memory
    pub sh_addr: u64,
    /// Offset in file
    pub sh_offset: u64,
    /// Size in bytes
    pub sh_size: u64,
    /// Link to another section
    pub sh_link: u32,
    /// Additional section information
    pub sh_info: u32,
    /// Section alignment
    pub sh_addralign: u64,
    /// Entry size if section holds a table
    pub sh_entsize: u64,
}

impl Elf64SectionHeader {
    /// Size of an ELF64 section header in bytes.
    pub const SIZE: usize = 64;

    /// Parse a section header from a byte slice.
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
            sh_name: read_u32(0),
            sh_type: SectionType::from(read_u32(4)),
            sh_flags: read_u64(8),
            sh_addr: read_u64(16),
            sh_offset: read_u64(24),
            sh_size: read_u64(32),
            sh_link: read_u32(40),
            sh_info: read_u32(44),
            sh_addralign: read_u64(48),
            sh_entsize: read_u64(56),
        })
    }

    /// Check if this is the dynamic symbol table.
    pub fn is_dynsym(&self) -> bool {
        matches!(self.sh_type, SectionType::Dynsym)
    }

    /// Check if this is a string table.
    pub fn is_strtab(&self) -> bool {
        matches!(self.sh_type, SectionType::Strtab)
    }

    /// Check if this is a RELA relocation section.
    pub fn is_rela(&self) -> bool {
        matches!(self.sh_type, SectionType::Rela)
    }

    /// Check if this is the SysV hash table.
    pub fn is_hash(&self) -> bool {
        matches!(self.sh_type, SectionType::Hash)
    }

    /// Check if this is the GNU hash table.
    pub fn is_gnu_hash(&self) -> bool {
        matches!(self.sh_type, SectionType::GnuHash)
    }

    /// Byte range of this section in the file, when in bounds.
    pub fn file_range(&self, file_len: usize) -> Option<core::ops::Range<usize>> {
        let start = usize::try_from(self.sh_offset).ok()?;
        let size = usize::try_from(self.sh_size).ok()?;
        let end = start.checked_add(size)?;
        (end <= file_len).then_some(start..end)
    }
}

/// Parse all section headers from an ELF file.
pub fn parse_section_headers(
    data: &[u8],
    shoff: u64,
    shentsize: u16,
    shnum: u16,
) -> ElfResult<Vec<Elf64SectionHeader>> {
    let shoff = shoff as usize;
    let shentsize = shentsize as usize;
    let shnum = shnum as usize;

    let end_offset = shoff
        .checked_add(
            shentsize
                .checked_mul(shnum)
                .ok_or(ElfError::InvalidOffset {
                    kind: "section header table",
                    offset: shoff as u64,
                })?,
        )
        .ok_or(ElfError::InvalidOffset {
            kind: "section header table",
            offset: shoff as u64,
        })?;

    if end_offset > data.len() {
        return Err(ElfError::BufferTooSmall {
            needed: end_offset,
            available: data.len(),
        });
    }
    if shnum > 0 && shentsize < Elf64SectionHeader::SIZE {
        return Err(ElfError::InvalidOffset {
            kind: "section header entry size",
            offset: shentsize as u64,
        });
    }

    let mut headers = Vec::with_capacity(shnum);
    for i in 0..shnum {
        let offset = shoff + i * shentsize;
        headers.push(Elf64SectionHeader::parse(&data[offset..])?);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_dynsym_header() -> [u8; 64] {
        let mut header = [0u8; 64];
        // sh_name = 0x20
        header[0] = 0x20;
        // sh_type = SHT_DYNSYM (11)
        header[4] = 11;
        // sh_offset = 0x400
        header[24] = 0x00;
        header[25] = 0x04;
        // sh_size = 0x180
        header[32] = 0x80;
        header[33] = 0x01;
        // sh_entsize = 24
        header[56] = 24;
        header
    }

    #[test]
    fn test_parse_section_header() {
        let data = make_dynsym_header();
        let sh = Elf64SectionHeader::parse(&data).unwrap();

        assert!(sh.is_dynsym());
        assert_eq!(sh.sh_name, 0x20);
        assert_eq!(sh.sh_offset, 0x400);
        assert_eq!(sh.sh_size, 0x180);
        assert_eq!(sh.sh_entsize, 24);
    }

    #[test]
    fn test_section_type_conversion() {
        assert!(matches!(SectionType::from(0), SectionType::Null));
        assert!(matches!(SectionType::from(3), SectionType::Strtab));
        assert!(matches!(SectionType::from(4), SectionType::Rela));
        assert!(matches!(SectionType::from(11), SectionType::Dynsym));
        assert!(matches!(
            SectionType::from(0x6fff_fff6),
            SectionType::GnuHash
        ));
        assert!(matches!(SectionType::from(12345), SectionType::Unknown(12345)));
    }

    #[test]
    fn test_file_range() {
        let data = make_dynsym_header();
        let sh = Elf64SectionHeader::parse(&data).unwrap();

        assert_eq!(sh.file_range(0x1000), Some(0x400..0x580));
        assert_eq!(sh.file_range(0x100), None);
    }
}
