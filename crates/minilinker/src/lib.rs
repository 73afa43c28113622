//! # minilinker
//!
//! A minimal userspace dynamic linker for ELF64 shared objects on x86_64
//! Linux. Loads an object into the current process, resolves its symbols
//! against previously-loaded images and the host's default namespace,
//! applies relocations eagerly, runs constructors, and exposes the
//! classic open/lookup/close/last-error surface.
//!
//! ```no_run
//! use minilinker::{DynamicLinker, RTLD_NOW};
//!
//! let mut linker = DynamicLinker::new();
//! let handle = linker.open("libdemo.so", RTLD_NOW).expect("load failed");
//! let addr = linker.lookup(handle, "demo_entry").expect("symbol missing");
//! let entry: extern "C" fn() = unsafe { std::mem::transmute(addr as *const ()) };
//! entry();
//! linker.close(handle);
//! ```
//!
//! Deliberately out of scope: `DT_NEEDED` dependency loading, TLS,
//! IFUNC, symbol versioning, lazy PLT binding, and non-x86_64 targets.
//! Pure parsing lives in the `minilinker-core` crate; this crate adds
//! the address-space work on top of it.

pub mod dlfcn;
mod dynimage;
pub mod error;
pub mod image;
pub mod linker;
pub mod mapper;
mod relocate;
pub mod soinfo;

pub use dlfcn::{Handle, RTLD_GLOBAL, RTLD_LAZY, RTLD_LOCAL, RTLD_NOW, dl_close, dl_error, dl_open, dl_sym};
pub use error::{LinkerError, LinkerResult};
pub use image::{ElfImage, ImageSummary};
pub use linker::{DynamicLinker, LoadPolicy, global_linker};
pub use soinfo::SharedObject;
