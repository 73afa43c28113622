//! Loader error taxonomy.

use minilinker_core::elf::ElfError;
use thiserror::Error;

/// Errors surfaced by the loader and the facade.
///
/// Open-time failures unwind the partial load, set the context's error
/// slot, and publish nothing; lookup failures only set the error slot.
#[derive(Debug, Error)]
pub enum LinkerError {
    /// The file is not a loadable ELF64/x86_64 object, or its dynamic
    /// section is deficient.
    #[error("bad format: {0}")]
    BadFormat(String),

    /// The host refused a reservation or overlay mapping.
    #[error("mapping failed: {0}")]
    MapFailure(String),

    /// A symbol lookup missed at the facade level.
    #[error("symbol not found: {0}")]
    NotFound(String),

    /// A recognized but unimplemented operation.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Allocation failure, I/O failure, or an invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ElfError> for LinkerError {
    fn from(err: ElfError) -> Self {
        Self::BadFormat(err.to_string())
    }
}

/// Result type for loader operations.
pub type LinkerResult<T> = Result<T, LinkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elf_error_maps_to_bad_format() {
        let err: LinkerError = ElfError::InvalidMagic.into();
        assert!(matches!(err, LinkerError::BadFormat(_)));
        assert_eq!(format!("{err}"), "bad format: invalid ELF magic");
    }

    #[test]
    fn test_display() {
        let err = LinkerError::NotFound("undefined_symbol".into());
        assert_eq!(format!("{err}"), "symbol not found: undefined_symbol");
    }
}
