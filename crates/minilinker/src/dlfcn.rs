//! The public four-call facade: open, lookup, close, last-error.
//!
//! Methods on [`DynamicLinker`] plus process-global free functions over
//! the mutex-guarded shared context. Failure never panics: it sets the
//! context's error slot and returns the null-ish value of the operation,
//! mirroring the classic runtime-loading interface.

use std::path::Path;

use minilinker_core::dlfcn::{RTLD_DEFAULT, RTLD_NEXT, conventional_flags};

use crate::error::LinkerError;
use crate::linker::{DynamicLinker, global_linker};

pub use minilinker_core::dlfcn::{RTLD_GLOBAL, RTLD_LAZY, RTLD_LOCAL, RTLD_NOW};

/// Opaque image handle returned by [`DynamicLinker::open`].
///
/// Two raw values are reserved as pseudo-handles for [`lookup`]:
/// [`Handle::DEFAULT`] searches the whole namespace, [`Handle::NEXT`] is
/// recognized but unimplemented.
///
/// [`lookup`]: DynamicLinker::lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(u64);

impl Handle {
    /// Global lookup across every resident image, then the host.
    pub const DEFAULT: Handle = Handle(RTLD_DEFAULT);
    /// "Search after the caller's image"; not implemented by this core.
    pub const NEXT: Handle = Handle(RTLD_NEXT);

    /// The raw handle value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl DynamicLinker {
    /// Open a shared object and run its constructors.
    ///
    /// All `RTLD_*` flag bits are accepted; binding is eager regardless.
    /// On failure the error slot is set and `None` is returned, with
    /// nothing published and nothing left mapped.
    pub fn open(&mut self, path: impl AsRef<Path>, flags: i32) -> Option<Handle> {
        let path = path.as_ref();
        if !conventional_flags(flags) {
            log::debug!(
                "[linker] open {}: unconventional flags {flags:#x} accepted",
                path.display()
            );
        }

        match self.load_object(path) {
            Ok(handle) => {
                // Constructors run after publication, before open returns,
                // so anything they look up can already see this image.
                if let Some(so) = self.image_by_handle(handle) {
                    so.call_constructors();
                }
                self.clear_error();
                Some(Handle(handle))
            }
            Err(err) => {
                self.set_error(err.to_string());
                None
            }
        }
    }

    /// Resolve a symbol to its runtime address.
    ///
    /// A real handle searches only that image. [`Handle::DEFAULT`]
    /// searches every resident image in load order and then the host
    /// namespace. [`Handle::NEXT`] sets a not-supported error.
    pub fn lookup(&mut self, handle: Handle, name: &str) -> Option<u64> {
        match handle.raw() {
            RTLD_DEFAULT => match self.find_global_symbol(name) {
                Some(addr) => {
                    self.clear_error();
                    Some(addr)
                }
                None => {
                    self.set_error(LinkerError::NotFound(name.into()).to_string());
                    None
                }
            },
            RTLD_NEXT => {
                self.set_error(LinkerError::NotSupported("RTLD_NEXT lookup").to_string());
                None
            }
            raw => {
                let Some(so) = self.image_by_handle(raw) else {
                    self.set_error(format!("invalid handle: {raw:#x}"));
                    return None;
                };
                match so.find_symbol(name) {
                    Some(addr) => {
                        self.clear_error();
                        Some(addr)
                    }
                    None => {
                        let image = so.name().to_string();
                        self.set_error(
                            LinkerError::NotFound(format!("{name} in {image}")).to_string(),
                        );
                        None
                    }
                }
            }
        }
    }

    /// Drop a reference to an opened image; teardown happens at zero.
    ///
    /// Returns 0 on success, nonzero (with the error slot set) for an
    /// invalid or pseudo handle.
    pub fn close(&mut self, handle: Handle) -> i32 {
        if handle == Handle::DEFAULT || handle == Handle::NEXT {
            self.set_error(format!("invalid handle: {:#x}", handle.raw()));
            return -1;
        }
        match self.unload_object(handle.raw()) {
            Ok(()) => {
                self.clear_error();
                0
            }
            Err(err) => {
                self.set_error(err.to_string());
                -1
            }
        }
    }

    /// Take another reference on an already-open image, so that one more
    /// [`close`] is needed before teardown.
    ///
    /// [`close`]: Self::close
    pub fn retain(&mut self, handle: Handle) -> bool {
        self.add_image_ref(handle.raw())
    }

    /// Current reference count of an image, when resident.
    pub fn ref_count(&self, handle: Handle) -> Option<usize> {
        self.image_ref_count(handle.raw())
    }

    /// Return the last error message and clear it.
    ///
    /// Two consecutive calls with no intervening failure yield the
    /// message and then `None`.
    pub fn last_error(&mut self) -> Option<String> {
        self.take_error()
    }
}

// ---------------------------------------------------------------------------
// Process-global convenience surface
// ---------------------------------------------------------------------------

/// [`DynamicLinker::open`] on the shared global context.
pub fn dl_open(path: impl AsRef<Path>, flags: i32) -> Option<Handle> {
    global_linker().lock().open(path, flags)
}

/// [`DynamicLinker::lookup`] on the shared global context.
pub fn dl_sym(handle: Handle, name: &str) -> Option<u64> {
    global_linker().lock().lookup(handle, name)
}

/// [`DynamicLinker::close`] on the shared global context.
pub fn dl_close(handle: Handle) -> i32 {
    global_linker().lock().close(handle)
}

/// [`DynamicLinker::last_error`] on the shared global context.
pub fn dl_error() -> Option<String> {
    global_linker().lock().last_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_sets_error() {
        let mut linker = DynamicLinker::new();
        assert!(linker.open("/nonexistent/minilinker.so", RTLD_NOW).is_none());
        let err = linker.last_error().expect("error slot should be set");
        assert!(err.contains("/nonexistent/minilinker.so"));
        // Second read is clear.
        assert_eq!(linker.last_error(), None);
        assert_eq!(linker.image_count(), 0);
    }

    #[test]
    fn test_next_pseudo_handle_not_supported() {
        let mut linker = DynamicLinker::new();
        assert!(linker.lookup(Handle::NEXT, "anything").is_none());
        let err = linker.last_error().unwrap();
        assert!(err.contains("not supported"));
    }

    #[test]
    fn test_default_handle_reaches_host() {
        let mut linker = DynamicLinker::new();
        assert!(linker.lookup(Handle::DEFAULT, "malloc").is_some());
        assert_eq!(linker.last_error(), None);
    }

    #[test]
    fn test_default_handle_miss_names_symbol() {
        let mut linker = DynamicLinker::new();
        assert!(
            linker
                .lookup(Handle::DEFAULT, "undefined_symbol_xyzzy")
                .is_none()
        );
        let err = linker.last_error().unwrap();
        assert!(err.contains("undefined_symbol_xyzzy"));
    }

    #[test]
    fn test_close_pseudo_handle_fails() {
        let mut linker = DynamicLinker::new();
        assert_ne!(linker.close(Handle::DEFAULT), 0);
        assert!(linker.last_error().is_some());
    }
}
