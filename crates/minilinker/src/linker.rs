//! Linker context: the image namespace, the error slot, and load/unload.
//!
//! `DynamicLinker` owns all process-wide mutable state of the loader: the
//! newest-first list of resident images (the global symbol-search
//! namespace) and the last-error slot. The facade in [`crate::dlfcn`] is
//! a thin layer over this context. A shared process-global instance is
//! available behind a mutex; tests construct private contexts instead.

use std::ffi::CString;
use std::path::Path;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::dynimage::interpret_dynamic;
use crate::error::{LinkerError, LinkerResult};
use crate::image::ElfImage;
use crate::mapper::map_image;
use crate::relocate::relocate;
use crate::soinfo::SharedObject;

/// Tunable load behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadPolicy {
    /// Fail the open when a relocation references a non-weak symbol that
    /// cannot be resolved. The default keeps the lenient behavior: log a
    /// warning and write zero at the patch site.
    pub strict_unresolved: bool,
}

/// The loader's process-wide state: resident images plus the error slot.
pub struct DynamicLinker {
    /// Resident images, newest first. Publication order is the global
    /// symbol-search order.
    images: Vec<SharedObject>,
    error: Option<String>,
    policy: LoadPolicy,
    next_handle: u64,
}

impl Default for DynamicLinker {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicLinker {
    /// A fresh context with the default (lenient) policy.
    pub fn new() -> Self {
        Self::with_policy(LoadPolicy::default())
    }

    /// A fresh context with an explicit policy.
    pub fn with_policy(policy: LoadPolicy) -> Self {
        Self {
            images: Vec::new(),
            error: None,
            policy,
            next_handle: 1,
        }
    }

    /// Resident images in search order (newest first).
    pub fn images(&self) -> impl Iterator<Item = &SharedObject> {
        self.images.iter()
    }

    /// Number of resident images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub(crate) fn image_by_handle(&self, handle: u64) -> Option<&SharedObject> {
        self.images.iter().find(|so| so.handle() == handle)
    }

    // -- error slot ---------------------------------------------------------

    pub(crate) fn set_error(&mut self, msg: impl Into<String>) {
        self.error = Some(msg.into());
    }

    pub(crate) fn clear_error(&mut self) {
        self.error = None;
    }

    /// Return and clear the stored error.
    pub(crate) fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }

    // -- symbol search ------------------------------------------------------

    /// Search every resident image in publication order, then fall back
    /// to the host's default resolver. The fallback is what lets loaded
    /// objects call libc routines without this loader re-implementing a
    /// C runtime.
    pub fn find_global_symbol(&self, name: &str) -> Option<u64> {
        for so in &self.images {
            if let Some(addr) = so.find_symbol(name) {
                return Some(addr);
            }
        }
        host_lookup(name)
    }

    // -- load / unload ------------------------------------------------------

    /// Load an object: read and validate, reserve and overlay, interpret
    /// the dynamic array, relocate, publish. Constructors are the
    /// facade's responsibility so that the image is resident before they
    /// run. Any failure unwinds fully; drop order releases the partial
    /// mapping and nothing is published.
    pub(crate) fn load_object(&mut self, path: &Path) -> LinkerResult<u64> {
        log::debug!("[linker] loading: {}", path.display());

        let image = ElfImage::open(path)?;
        let mapped = map_image(&image)?;
        let (tables, symbol_count) = interpret_dynamic(&mapped, &image)?;

        let handle = self.next_handle;
        let so = SharedObject::new(
            image.name().to_string(),
            handle,
            mapped,
            tables,
            symbol_count,
        );

        {
            let images = &self.images;
            let resolver =
                |name: &str| images.iter().find_map(|s| s.find_symbol(name)).or_else(|| host_lookup(name));
            relocate(&so, &resolver, &self.policy)?;
        }

        self.next_handle += 1;
        self.images.insert(0, so);
        log::debug!("[linker] loaded: {} (handle {handle})", path.display());
        Ok(handle)
    }

    /// Drop one reference to an image. At zero: run destructors, unlink,
    /// and unmap.
    pub(crate) fn unload_object(&mut self, handle: u64) -> LinkerResult<()> {
        let pos = self
            .images
            .iter()
            .position(|so| so.handle() == handle)
            .ok_or(LinkerError::Internal(format!("invalid handle: {handle:#x}")))?;

        if self.images[pos].release() > 0 {
            return Ok(());
        }

        self.images[pos].call_destructors();
        let so = self.images.remove(pos);
        log::debug!("[linker] unloaded: {}", so.name());
        drop(so);
        Ok(())
    }

    pub(crate) fn add_image_ref(&mut self, handle: u64) -> bool {
        match self.images.iter_mut().find(|so| so.handle() == handle) {
            Some(so) => {
                so.add_ref();
                true
            }
            None => false,
        }
    }

    pub(crate) fn image_ref_count(&self, handle: u64) -> Option<usize> {
        self.image_by_handle(handle).map(|so| so.ref_count())
    }
}

/// Query the host runtime's default symbol namespace.
fn host_lookup(name: &str) -> Option<u64> {
    let cname = CString::new(name).ok()?;
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr()) };
    (!addr.is_null()).then_some(addr as u64)
}

static GLOBAL_LINKER: OnceLock<Mutex<DynamicLinker>> = OnceLock::new();

/// The process-global linker context.
///
/// One coarse mutex covers all four facade operations; concurrent use of
/// private contexts needs no locking at all.
pub fn global_linker() -> &'static Mutex<DynamicLinker> {
    GLOBAL_LINKER.get_or_init(|| Mutex::new(DynamicLinker::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_lookup_finds_libc() {
        // The test binary links libc, so the default namespace must
        // resolve its basics.
        assert!(host_lookup("malloc").is_some());
        assert!(host_lookup("printf").is_some());
        assert!(host_lookup("__definitely_not_a_real_symbol__").is_none());
    }

    #[test]
    fn test_error_slot() {
        let mut linker = DynamicLinker::new();
        assert_eq!(linker.take_error(), None);

        linker.set_error("boom");
        assert_eq!(linker.take_error().as_deref(), Some("boom"));
        // Reading clears.
        assert_eq!(linker.take_error(), None);
    }

    #[test]
    fn test_unload_unknown_handle() {
        let mut linker = DynamicLinker::new();
        assert!(matches!(
            linker.unload_object(0x999),
            Err(LinkerError::Internal(_))
        ));
    }

    #[test]
    fn test_global_lookup_empty_context_uses_host() {
        let linker = DynamicLinker::new();
        assert!(linker.find_global_symbol("malloc").is_some());
    }
}
