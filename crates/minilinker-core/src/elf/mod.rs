//! ELF64 parsing for x86_64 Linux shared objects.
//!
//! Structures are decoded field-by-field from little-endian byte slices;
//! no transmutation, no alignment requirements on the input. Each
//! submodule carries its own unit tests against hand-built fixtures.
//!
//! Scope notes:
//!
//! - RELA relocations only (x86_64 does not use REL).
//! - Supported relocation types: `R_X86_64_NONE`, `R_X86_64_64`,
//!   `R_X86_64_GLOB_DAT`, `R_X86_64_JUMP_SLOT`, `R_X86_64_RELATIVE`,
//!   `R_X86_64_COPY`. Everything else is reported as unknown.
//! - No symbol versioning, no TLS, no IFUNC.

pub mod dynamic;
pub mod hash;
pub mod header;
pub mod program;
pub mod relocation;
pub mod section;
pub mod symbol;

pub use dynamic::{DynTag, DynamicInfo, Elf64Dyn, parse_dynamic_entries};
pub use hash::{ElfHashTable, GnuHashTable, elf_hash, gnu_hash};
pub use header::{Elf64Header, ElfClass, ElfData, ElfMachine, ElfType};
pub use program::{Elf64ProgramHeader, ProgramFlags, ProgramType, load_span};
pub use relocation::{Elf64Rela, RelocationAction, RelocationType, relocation_action};
pub use section::{Elf64SectionHeader, SectionType};
pub use symbol::{Elf64Symbol, SymbolBinding, SymbolType, get_string, linear_lookup};

/// ELF magic bytes: "\x7fELF"
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Size of the ELF identification array.
pub const EI_NIDENT: usize = 16;

/// Error type for ELF parsing and lookup operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElfError {
    /// Invalid ELF magic bytes
    InvalidMagic,
    /// Unsupported ELF class (not ELF64)
    UnsupportedClass(u8),
    /// Unsupported data encoding (not little-endian)
    UnsupportedEncoding(u8),
    /// Unsupported object type (not shared object or executable)
    UnsupportedType(u16),
    /// Unsupported machine type (not x86_64)
    UnsupportedMachine(u16),
    /// Invalid table offset
    InvalidOffset { kind: &'static str, offset: u64 },
    /// Buffer too small for the requested structure
    BufferTooSmall { needed: usize, available: usize },
    /// Invalid string table index
    InvalidStringIndex(u32),
    /// No loadable segment in the program-header table
    NoLoadableSegments,
    /// A required dynamic table is missing
    MissingDynamicTable(&'static str),
}

impl core::fmt::Display for ElfError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "invalid ELF magic"),
            Self::UnsupportedClass(c) => write!(f, "unsupported ELF class: {c}"),
            Self::UnsupportedEncoding(e) => write!(f, "unsupported data encoding: {e}"),
            Self::UnsupportedType(t) => write!(f, "unsupported object type: {t}"),
            Self::UnsupportedMachine(m) => write!(f, "unsupported machine type: {m}"),
            Self::InvalidOffset { kind, offset } => {
                write!(f, "invalid {kind} offset: {offset:#x}")
            }
            Self::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small: need {needed}, have {available}")
            }
            Self::InvalidStringIndex(idx) => write!(f, "invalid string index: {idx}"),
            Self::NoLoadableSegments => write!(f, "no loadable segments"),
            Self::MissingDynamicTable(name) => write!(f, "missing dynamic table: {name}"),
        }
    }
}

impl std::error::Error for ElfError {}

/// Result type for ELF operations.
pub type ElfResult<T> = Result<T, ElfError>;
