//! ELF64 RELA relocation parsing and value computation.
//!
//! x86_64 uses RELA exclusively (explicit addends). The loader applies
//! both the data table (`DT_RELA`) and the PLT table (`DT_JMPREL`)
//! eagerly and identically; lazy binding is out of scope.
//!
//! Supported types and the value written at the target:
//!
//! | Type | Written |
//! |---|---|
//! | `R_X86_64_NONE` | nothing |
//! | `R_X86_64_64` | S + A |
//! | `R_X86_64_GLOB_DAT` | S |
//! | `R_X86_64_JUMP_SLOT` | S |
//! | `R_X86_64_RELATIVE` | B + A |
//! | `R_X86_64_COPY` | `st_size` bytes copied from S |
//!
//! S = resolved symbol address, A = addend, B = load bias. Anything else
//! is reported as unknown for the caller to log and skip.

use super::{ElfError, ElfResult};

/// x86_64 relocation types handled by this loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationType {
    /// No relocation
    None,
    /// Direct 64-bit (S + A)
    Abs64,
    /// Runtime copy of the symbol's bytes
    Copy,
    /// GOT entry (S)
    GlobDat,
    /// PLT entry (S)
    JumpSlot,
    /// Base-relative (B + A)
    Relative,
    /// Anything else: logged and skipped
    Unknown(u32),
}

impl From<u32> for RelocationType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Abs64,
            5 => Self::Copy,
            6 => Self::GlobDat,
            7 => Self::JumpSlot,
            8 => Self::Relative,
            other => Self::Unknown(other),
        }
    }
}

impl RelocationType {
    /// Convert to the raw u32 value.
    pub fn to_u32(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Abs64 => 1,
            Self::Copy => 5,
            Self::GlobDat => 6,
            Self::JumpSlot => 7,
            Self::Relative => 8,
            Self::Unknown(v) => v,
        }
    }

    /// Whether the relocation needs a resolved symbol address.
    pub fn needs_symbol(self) -> bool {
        matches!(self, Self::Abs64 | Self::GlobDat | Self::JumpSlot | Self::Copy)
    }
}

/// ELF64 RELA relocation entry.
#[derive(Debug, Clone, Copy)]
pub struct Elf64Rela {
    /// Offset of the patch site (image-relative virtual address)
    pub r_offset: u64,
    /// Packed relocation type (low 32 bits) and symbol index (high 32)
    pub r_info: u64,
    /// Constant addend
    pub r_addend: i64,
}

impl Elf64Rela {
    /// Size of an ELF64 RELA entry in bytes.
    pub const SIZE: usize = 24;

    /// Parse a RELA entry from a byte slice.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }

        Ok(Self {
            r_offset: u64::from_le_bytes([
                data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
            ]),
            r_info: u64::from_le_bytes([
                data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
            ]),
            r_addend: i64::from_le_bytes([
                data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
            ]),
        })
    }

    /// Read entry `index` out of a raw relocation-table byte region.
    pub fn at_index(table: &[u8], index: usize) -> ElfResult<Self> {
        let offset = index
            .checked_mul(Self::SIZE)
            .ok_or(ElfError::InvalidOffset {
                kind: "relocation table",
                offset: index as u64,
            })?;
        if offset >= table.len() {
            return Err(ElfError::BufferTooSmall {
                needed: offset + Self::SIZE,
                available: table.len(),
            });
        }
        Self::parse(&table[offset..])
    }

    /// Get the relocation type (low 32 bits of `r_info`).
    pub fn reloc_type(&self) -> RelocationType {
        RelocationType::from((self.r_info & 0xffff_ffff) as u32)
    }

    /// Get the symbol index (high 32 bits of `r_info`).
    pub fn symbol_index(&self) -> u32 {
        (self.r_info >> 32) as u32
    }
}

/// What the relocator must do at a patch site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationAction {
    /// Nothing to write (`R_X86_64_NONE`)
    Skip,
    /// Store a 64-bit word at the target
    Write64(u64),
    /// Copy the symbol's bytes into the target (`R_X86_64_COPY`);
    /// the length is the symbol's `st_size`
    CopyFromSymbol,
    /// Unrecognized type: log and skip
    Unknown(u32),
}

/// Compute the action for one relocation entry.
///
/// `symbol_value` is the resolved symbol address S (zero when the entry
/// has no symbol or a weak reference went unresolved); `load_bias` is B.
pub fn relocation_action(
    reloc: &Elf64Rela,
    symbol_value: u64,
    load_bias: u64,
) -> RelocationAction {
    let s = symbol_value;
    let a = reloc.r_addend as u64;

    match reloc.reloc_type() {
        RelocationType::None => RelocationAction::Skip,
        RelocationType::Abs64 => RelocationAction::Write64(s.wrapping_add(a)),
        RelocationType::GlobDat | RelocationType::JumpSlot => RelocationAction::Write64(s),
        RelocationType::Relative => RelocationAction::Write64(load_bias.wrapping_add(a)),
        RelocationType::Copy => RelocationAction::CopyFromSymbol,
        RelocationType::Unknown(t) => RelocationAction::Unknown(t),
    }
}
