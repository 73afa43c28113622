//! ELF64 dynamic-section interpretation.
//!
//! The dynamic array is a sequence of tag/value pairs terminated by a
//! zero tag. It tells the loader where the image's symbol table, string
//! table, hash tables, relocation tables, and init/fini hooks live. All
//! pointer-valued tags are virtual addresses relative to the image; the
//! runtime adds the load bias.

use super::relocation::Elf64Rela;
use super::{ElfError, ElfResult};

/// Dynamic-array tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynTag {
    /// End of the dynamic array
    Null,
    /// Name offset of a needed library
    Needed,
    /// Total size of the PLT relocation table
    PltRelSz,
    /// PLT/GOT address
    PltGot,
    /// ELF (SysV) hash table address
    Hash,
    /// String table address
    StrTab,
    /// Symbol table address
    SymTab,
    /// RELA relocation table address
    Rela,
    /// Total size of the RELA table
    RelaSz,
    /// Size of one RELA entry
    RelaEnt,
    /// String table size in bytes
    StrSz,
    /// Size of one symbol entry
    SymEnt,
    /// Legacy single init function
    Init,
    /// Legacy single fini function
    Fini,
    /// PLT relocation table address
    JmpRel,
    /// Init function array address
    InitArray,
    /// Fini function array address
    FiniArray,
    /// Init array total size in bytes
    InitArraySz,
    /// Fini array total size in bytes
    FiniArraySz,
    /// GNU hash table address
    GnuHash,
    /// Unrecognized tag, ignored
    Unknown(i64),
}

impl From<i64> for DynTag {
    fn from(value: i64) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::Needed,
            2 => Self::PltRelSz,
            3 => Self::PltGot,
            4 => Self::Hash,
            5 => Self::StrTab,
            6 => Self::SymTab,
            7 => Self::Rela,
            8 => Self::RelaSz,
            9 => Self::RelaEnt,
            10 => Self::StrSz,
            11 => Self::SymEnt,
            12 => Self::Init,
            13 => Self::Fini,
            23 => Self::JmpRel,
            25 => Self::InitArray,
            26 => Self::FiniArray,
            27 => Self::InitArraySz,
            28 => Self::FiniArraySz,
            0x6fff_fef5 => Self::GnuHash,
            other => Self::Unknown(other),
        }
    }
}

/// ELF64 dynamic-array entry: a tag and a value (address or size,
/// depending on the tag).
#[derive(Debug, Clone, Copy)]
pub struct Elf64Dyn {
    /// Entry tag
    pub d_tag: i64,
    /// Entry value (`d_ptr` or `d_val` of the on-disk union)
    pub d_val: u64,
}

impl Elf64Dyn {
    /// Size of an ELF64 dynamic entry in bytes.
    pub const SIZE: usize = 16;

    /// Parse a dynamic entry from a byte slice.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }
        Ok(Self {
            d_tag: i64::from_le_bytes([
                data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
            ]),
            d_val: u64::from_le_bytes([
                data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
            ]),
        })
    }

    /// Classify the tag.
    pub fn tag(&self) -> DynTag {
        DynTag::from(self.d_tag)
    }
}

/// Parse dynamic entries from a byte region, stopping at the terminating
/// zero tag (or at the end of the region for a malformed array).
pub fn parse_dynamic_entries(data: &[u8]) -> Vec<Elf64Dyn> {
    let mut entries = Vec::new();
    for chunk in data.chunks_exact(Elf64Dyn::SIZE) {
        let entry = match Elf64Dyn::parse(chunk) {
            Ok(e) => e,
            Err(_) => break,
        };
        if matches!(entry.tag(), DynTag::Null) {
            break;
        }
        entries.push(entry);
    }
    entries
}

/// Interpreted dynamic section: one pointer or count per recognized tag.
///
/// Addresses are image-relative virtual addresses exactly as stored in
/// the array; callers add the load bias. Counts are derived from the
/// total-size tags divided by the architecturally fixed entry sizes.
#[derive(Debug, Clone, Default)]
pub struct DynamicInfo {
    /// Symbol table address (`DT_SYMTAB`)
    pub symtab: Option<u64>,
    /// String table address (`DT_STRTAB`)
    pub strtab: Option<u64>,
    /// String table size in bytes (`DT_STRSZ`)
    pub strtab_size: u64,
    /// ELF hash table address (`DT_HASH`)
    pub hash: Option<u64>,
    /// GNU hash table address (`DT_GNU_HASH`)
    pub gnu_hash: Option<u64>,
    /// RELA table address (`DT_RELA`)
    pub rela: Option<u64>,
    /// RELA entry count (`DT_RELASZ` / 24)
    pub rela_count: usize,
    /// PLT RELA table address (`DT_JMPREL`)
    pub plt_rela: Option<u64>,
    /// PLT RELA entry count (`DT_PLTRELSZ` / 24)
    pub plt_rela_count: usize,
    /// Legacy init function (`DT_INIT`)
    pub init: Option<u64>,
    /// Legacy fini function (`DT_FINI`)
    pub fini: Option<u64>,
    /// Init array address (`DT_INIT_ARRAY`)
    pub init_array: Option<u64>,
    /// Init array entry count (`DT_INIT_ARRAYSZ` / 8)
    pub init_array_count: usize,
    /// Fini array address (`DT_FINI_ARRAY`)
    pub fini_array: Option<u64>,
    /// Fini array entry count (`DT_FINI_ARRAYSZ` / 8)
    pub fini_array_count: usize,
    /// Name offsets of needed libraries (`DT_NEEDED`), diagnostics only;
    /// dependency loading is out of scope.
    pub needed: Vec<u64>,
}

impl DynamicInfo {
    /// Collect recognized tags from a parsed dynamic array. Unknown tags
    /// are silently ignored.
    pub fn collect(entries: &[Elf64Dyn]) -> Self {
        let mut info = Self::default();

        for entry in entries {
            match entry.tag() {
                DynTag::SymTab => info.symtab = Some(entry.d_val),
                DynTag::StrTab => info.strtab = Some(entry.d_val),
                DynTag::StrSz => info.strtab_size = entry.d_val,
                DynTag::Hash => info.hash = Some(entry.d_val),
                DynTag::GnuHash => info.gnu_hash = Some(entry.d_val),
                DynTag::Rela => info.rela = Some(entry.d_val),
                DynTag::RelaSz => {
                    info.rela_count = entry.d_val as usize / Elf64Rela::SIZE;
                }
                DynTag::JmpRel => info.plt_rela = Some(entry.d_val),
                DynTag::PltRelSz => {
                    info.plt_rela_count = entry.d_val as usize / Elf64Rela::SIZE;
                }
                DynTag::Init => info.init = Some(entry.d_val),
                DynTag::Fini => info.fini = Some(entry.d_val),
                DynTag::InitArray => info.init_array = Some(entry.d_val),
                DynTag::InitArraySz => {
                    info.init_array_count = entry.d_val as usize / 8;
                }
                DynTag::FiniArray => info.fini_array = Some(entry.d_val),
                DynTag::FiniArraySz => {
                    info.fini_array_count = entry.d_val as usize / 8;
                }
                DynTag::Needed => info.needed.push(entry.d_val),
                DynTag::Null
                | DynTag::PltGot
                | DynTag::RelaEnt
                | DynTag::SymEnt
                | DynTag::Unknown(_) => {}
            }
        }

        info
    }

    /// True when the image carries any relocation table.
    pub fn has_relocations(&self) -> bool {
        (self.rela.is_some() && self.rela_count > 0)
            || (self.plt_rela.is_some() && self.plt_rela_count > 0)
    }

    /// Enforce that the symbol and string tables exist when relocations
    /// will need to reference symbols.
    pub fn validate(&self) -> ElfResult<()> {
        if self.has_relocations() {
            if self.symtab.is_none() {
                return Err(ElfError::MissingDynamicTable("DT_SYMTAB"));
            }
            if self.strtab.is_none() {
                return Err(ElfError::MissingDynamicTable("DT_STRTAB"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dyn_entry(tag: i64, val: u64) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&tag.to_le_bytes());
        bytes[8..16].copy_from_slice(&val.to_le_bytes());
        bytes
    }

    fn make_dynamic_array(entries: &[(i64, u64)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for &(tag, val) in entries {
            bytes.extend_from_slice(&dyn_entry(tag, val));
        }
        bytes.extend_from_slice(&dyn_entry(0, 0)); // DT_NULL
        bytes
    }

    #[test]
    fn test_parse_stops_at_null() {
        let bytes = make_dynamic_array(&[(6, 0x400), (5, 0x600), (10, 0x80)]);
        let entries = parse_dynamic_entries(&bytes);
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0].tag(), DynTag::SymTab));
        assert!(matches!(entries[1].tag(), DynTag::StrTab));
        assert!(matches!(entries[2].tag(), DynTag::StrSz));
    }

    #[test]
    fn test_collect() {
        let bytes = make_dynamic_array(&[
            (6, 0x400),          // DT_SYMTAB
            (5, 0x600),          // DT_STRTAB
            (10, 0x80),          // DT_STRSZ
            (4, 0x300),          // DT_HASH
            (0x6fff_fef5, 0x350), // DT_GNU_HASH
            (7, 0x800),          // DT_RELA
            (8, 72),             // DT_RELASZ = 3 entries
            (23, 0x900),         // DT_JMPREL
            (2, 48),             // DT_PLTRELSZ = 2 entries
            (12, 0x1000),        // DT_INIT
            (13, 0x1100),        // DT_FINI
            (25, 0x1200),        // DT_INIT_ARRAY
            (27, 16),            // DT_INIT_ARRAYSZ = 2 entries
            (26, 0x1300),        // DT_FINI_ARRAY
            (28, 8),             // DT_FINI_ARRAYSZ = 1 entry
            (1, 0x42),           // DT_NEEDED
            (0x6fff_fffb, 0x8),  // DT_FLAGS_1, unknown here, ignored
        ]);
        let info = DynamicInfo::collect(&parse_dynamic_entries(&bytes));

        assert_eq!(info.symtab, Some(0x400));
        assert_eq!(info.strtab, Some(0x600));
        assert_eq!(info.strtab_size, 0x80);
        assert_eq!(info.hash, Some(0x300));
        assert_eq!(info.gnu_hash, Some(0x350));
        assert_eq!(info.rela, Some(0x800));
        assert_eq!(info.rela_count, 3);
        assert_eq!(info.plt_rela, Some(0x900));
        assert_eq!(info.plt_rela_count, 2);
        assert_eq!(info.init, Some(0x1000));
        assert_eq!(info.fini, Some(0x1100));
        assert_eq!(info.init_array, Some(0x1200));
        assert_eq!(info.init_array_count, 2);
        assert_eq!(info.fini_array, Some(0x1300));
        assert_eq!(info.fini_array_count, 1);
        assert_eq!(info.needed, vec![0x42]);
        assert!(info.has_relocations());
        assert!(info.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_symtab() {
        let bytes = make_dynamic_array(&[(5, 0x600), (7, 0x800), (8, 24)]);
        let info = DynamicInfo::collect(&parse_dynamic_entries(&bytes));
        assert!(matches!(
            info.validate(),
            Err(ElfError::MissingDynamicTable("DT_SYMTAB"))
        ));
    }

    #[test]
    fn test_validate_no_relocations_is_lenient() {
        let info = DynamicInfo::collect(&[]);
        assert!(!info.has_relocations());
        assert!(info.validate().is_ok());
    }
}
