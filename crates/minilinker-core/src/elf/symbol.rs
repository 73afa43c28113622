//! ELF64 symbol table parsing and the linear lookup fallback.
//!
//! Symbols represent named entities (functions, variables) in an ELF file.
//! The symbol table is consumed as raw bytes so that the same code walks
//! both a file view and a bounded view over live memory.

use super::{ElfError, ElfResult};

/// Symbol binding (scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolBinding {
    /// Local (not visible outside the object)
    Local,
    /// Global (visible everywhere)
    Global,
    /// Weak (like global, but an unresolved reference defaults to zero)
    Weak,
    /// Unknown binding
    Unknown(u8),
}

impl From<u8> for SymbolBinding {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Local,
            1 => Self::Global,
            2 => Self::Weak,
            other => Self::Unknown(other),
        }
    }
}

/// Symbol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    /// Unspecified type
    NoType,
    /// Data object (variable)
    Object,
    /// Function
    Func,
    /// Section
    Section,
    /// Source file name
    File,
    /// Common symbol
    Common,
    /// TLS data object
    Tls,
    /// Indirect function (GNU extension)
    IFunc,
    /// Unknown type
    Unknown(u8),
}

impl From<u8> for SymbolType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::NoType,
            1 => Self::Object,
            2 => Self::Func,
            3 => Self::Section,
            4 => Self::File,
            5 => Self::Common,
            6 => Self::Tls,
            10 => Self::IFunc,
            other => Self::Unknown(other),
        }
    }
}

/// Special section indices.
pub mod section_index {
    /// Undefined symbol
    pub const SHN_UNDEF: u16 = 0;
    /// Absolute value
    pub const SHN_ABS: u16 = 0xfff1;
    /// Common symbol
    pub const SHN_COMMON: u16 = 0xfff2;
}

/// ELF64 symbol table entry.
#[derive(Debug, Clone, Copy)]
pub struct Elf64Symbol {
    /// Symbol name (index into string table)
    pub st_name: u32,
    /// Symbol info (type and binding)
    pub st_info: u8,
    /// Symbol visibility
    pub st_other: u8,
    /// Section index
    pub st_shndx: u16,
    /// Symbol value (address)
    pub st_value: u64,
    /// Symbol size
    pub st_size: u64,
}

impl Elf64Symbol {
    /// Size of an ELF64 symbol entry in bytes.
    pub const SIZE: usize = 24;

    /// Parse a symbol from a byte slice.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }

        Ok(Self {
            st_name: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            st_info: data[4],
            st_other: data[5],
            st_shndx: u16::from_le_bytes([data[6], data[7]]),
            st_value: u64::from_le_bytes([
                data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
            ]),
            st_size: u64::from_le_bytes([
                data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
            ]),
        })
    }

    /// Read entry `index` out of a raw symbol-table byte region.
    pub fn at_index(symtab: &[u8], index: u32) -> ElfResult<Self> {
        let offset = (index as usize)
            .checked_mul(Self::SIZE)
            .ok_or(ElfError::InvalidOffset {
                kind: "symbol table",
                offset: index as u64,
            })?;
        if offset >= symtab.len() {
            return Err(ElfError::BufferTooSmall {
                needed: offset + Self::SIZE,
                available: symtab.len(),
            });
        }
        Self::parse(&symtab[offset..])
    }

    /// Get the symbol binding.
    pub fn binding(&self) -> SymbolBinding {
        SymbolBinding::from(self.st_info >> 4)
    }

    /// Get the symbol type.
    pub fn symbol_type(&self) -> SymbolType {
        SymbolType::from(self.st_info & 0xf)
    }

    /// Check if this is an undefined symbol.
    pub fn is_undefined(&self) -> bool {
        self.st_shndx == section_index::SHN_UNDEF
    }

    /// Check if this symbol is defined (has a value in this object).
    pub fn is_defined(&self) -> bool {
        !self.is_undefined() && self.st_shndx != section_index::SHN_COMMON
    }

    /// Check if this is a function symbol.
    pub fn is_function(&self) -> bool {
        matches!(self.symbol_type(), SymbolType::Func)
    }

    /// Check if this is an object (data) symbol.
    pub fn is_object(&self) -> bool {
        matches!(self.symbol_type(), SymbolType::Object)
    }

    /// Check if this is a global symbol.
    pub fn is_global(&self) -> bool {
        matches!(self.binding(), SymbolBinding::Global)
    }

    /// Check if this is a weak symbol.
    pub fn is_weak(&self) -> bool {
        matches!(self.binding(), SymbolBinding::Weak)
    }

    /// Check if this is a local symbol.
    pub fn is_local(&self) -> bool {
        matches!(self.binding(), SymbolBinding::Local)
    }

    /// A symbol satisfies a by-name lookup iff it is defined here and
    /// bound global or weak.
    pub fn qualifies_for_lookup(&self) -> bool {
        self.is_defined() && (self.is_global() || self.is_weak())
    }
}

/// Get a NUL-terminated string from a string table.
pub fn get_string(strtab: &[u8], index: u32) -> ElfResult<&str> {
    let index = index as usize;
    if index >= strtab.len() {
        return Err(ElfError::InvalidStringIndex(index as u32));
    }

    let end = strtab[index..]
        .iter()
        .position(|&b| b == 0)
        .ok_or(ElfError::InvalidStringIndex(index as u32))?;

    core::str::from_utf8(&strtab[index..index + end])
        .map_err(|_| ElfError::InvalidStringIndex(index as u32))
}

/// Returns true when symbol `sym`'s name in `strtab` equals `name`.
pub(crate) fn name_matches(sym: &Elf64Symbol, strtab: &[u8], name: &str) -> bool {
    matches!(get_string(strtab, sym.st_name), Ok(n) if n == name)
}

/// Linear symbol scan, the fallback when an image carries no hash table.
///
/// Walks up to `max_count` entries of the raw symbol table and returns the
/// first defined, global-or-weak symbol whose name matches. `max_count`
/// comes from the hash table when one exists and from a fixed cap
/// otherwise; the scan also stops at the end of the byte region.
pub fn linear_lookup(
    symtab: &[u8],
    strtab: &[u8],
    name: &str,
    max_count: usize,
) -> Option<(u32, Elf64Symbol)> {
    let available = symtab.len() / Elf64Symbol::SIZE;
    for index in 0..max_count.min(available) {
        let sym = Elf64Symbol::at_index(symtab, index as u32).ok()?;
        if sym.st_name == 0 || !sym.qualifies_for_lookup() {
            continue;
        }
        if name_matches(&sym, strtab, name) {
            return Some((index as u32, sym));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_symbol(name: u32, info: u8, shndx: u16, value: u64) -> [u8; 24] {
        let mut sym = [0u8; 24];
        sym[0..4].copy_from_slice(&name.to_le_bytes());
        sym[4] = info;
        sym[6..8].copy_from_slice(&shndx.to_le_bytes());
        sym[8..16].copy_from_slice(&value.to_le_bytes());
        sym[16..24].copy_from_slice(&0x100u64.to_le_bytes());
        sym
    }

    #[test]
    fn test_parse_symbol() {
        // GLOBAL (1 << 4) | FUNC (2)
        let data = make_symbol(0x10, 0x12, 1, 0x1000);
        let sym = Elf64Symbol::parse(&data).unwrap();

        assert_eq!(sym.st_name, 0x10);
        assert!(sym.is_function());
        assert!(sym.is_global());
        assert!(sym.is_defined());
        assert!(sym.qualifies_for_lookup());
        assert_eq!(sym.st_value, 0x1000);
        assert_eq!(sym.st_size, 0x100);
    }

    #[test]
    fn test_undefined_symbol() {
        let data = make_symbol(0x10, 0x12, section_index::SHN_UNDEF, 0);
        let sym = Elf64Symbol::parse(&data).unwrap();

        assert!(sym.is_undefined());
        assert!(!sym.is_defined());
        assert!(!sym.qualifies_for_lookup());
    }

    #[test]
    fn test_weak_symbol_qualifies() {
        // WEAK (2 << 4) | OBJECT (1)
        let data = make_symbol(0x10, 0x21, 2, 0x2000);
        let sym = Elf64Symbol::parse(&data).unwrap();

        assert!(sym.is_weak());
        assert!(!sym.is_global());
        assert!(sym.qualifies_for_lookup());
    }

    #[test]
    fn test_local_symbol_does_not_qualify() {
        // LOCAL (0 << 4) | FUNC (2)
        let data = make_symbol(0x10, 0x02, 1, 0x3000);
        let sym = Elf64Symbol::parse(&data).unwrap();

        assert!(sym.is_local());
        assert!(!sym.qualifies_for_lookup());
    }

    #[test]
    fn test_get_string() {
        let strtab = b"\0hello\0world\0";
        assert_eq!(get_string(strtab, 1).unwrap(), "hello");
        assert_eq!(get_string(strtab, 7).unwrap(), "world");
        assert!(get_string(strtab, 100).is_err());
    }

    #[test]
    fn test_linear_lookup() {
        let strtab = b"\0add\0mul\0";
        let mut symtab = Vec::new();
        symtab.extend_from_slice(&make_symbol(0, 0, 0, 0)); // null entry
        symtab.extend_from_slice(&make_symbol(1, 0x12, 1, 0x1000)); // add
        symtab.extend_from_slice(&make_symbol(5, 0x12, 1, 0x2000)); // mul

        let (idx, sym) = linear_lookup(&symtab, strtab, "mul", 256).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(sym.st_value, 0x2000);

        assert!(linear_lookup(&symtab, strtab, "missing", 256).is_none());
        // Cap below the matching index hides the symbol.
        assert!(linear_lookup(&symtab, strtab, "mul", 2).is_none());
    }

    #[test]
    fn test_linear_lookup_skips_undefined() {
        let strtab = b"\0add\0";
        let mut symtab = Vec::new();
        symtab.extend_from_slice(&make_symbol(0, 0, 0, 0));
        symtab.extend_from_slice(&make_symbol(1, 0x12, section_index::SHN_UNDEF, 0));

        assert!(linear_lookup(&symtab, strtab, "add", 256).is_none());
    }
}
