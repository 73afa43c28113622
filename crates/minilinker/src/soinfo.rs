//! The per-image record: mapping, linked tables, lookup, and init/fini.
//!
//! One `SharedObject` exists per successfully opened image. It owns the
//! reserved region (so dropping the record is the unmap), carries the
//! runtime addresses interpreted from the dynamic array, performs
//! per-image symbol lookup, and dispatches constructors and destructors.

use std::ops::Range;

use minilinker_core::elf::{
    Elf64Symbol, ElfHashTable, GnuHashTable, symbol::linear_lookup,
};

use crate::dynimage::{self, LinkedTables};
use crate::mapper::{MappedImage, MappedRegion};

/// Function-pointer sentinels some toolchains leave in init/fini arrays.
fn is_valid_func_ptr(addr: u64) -> bool {
    addr != 0 && addr != u64::MAX
}

/// A loaded shared object, resident in the process address space.
pub struct SharedObject {
    name: String,
    handle: u64,
    region: MappedRegion,
    load_bias: u64,
    phdr_addr: u64,
    phnum: usize,
    dynamic_addr: u64,
    segments: Vec<Range<u64>>,
    tables: LinkedTables,
    symbol_count: usize,
    ref_count: usize,
}

impl SharedObject {
    pub(crate) fn new(
        name: String,
        handle: u64,
        mapped: MappedImage,
        tables: LinkedTables,
        symbol_count: usize,
    ) -> Self {
        let dynamic_addr = mapped.dynamic_addr.unwrap_or(0);
        Self {
            name,
            handle,
            region: mapped.region,
            load_bias: mapped.load_bias,
            phdr_addr: mapped.phdr_addr,
            phnum: mapped.phnum,
            dynamic_addr,
            segments: mapped.segments,
            tables,
            symbol_count,
            ref_count: 1,
        }
    }

    /// Opaque identifier, typically the open path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Facade handle id.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Starting address of the reserved region.
    pub fn base(&self) -> u64 {
        self.region.base()
    }

    /// Byte length of the reserved region.
    pub fn size(&self) -> usize {
        self.region.size()
    }

    /// Load bias: added to ELF virtual addresses for runtime addresses.
    pub fn load_bias(&self) -> u64 {
        self.load_bias
    }

    /// Runtime address of the program-header table.
    pub fn phdr_addr(&self) -> u64 {
        self.phdr_addr
    }

    /// Number of program headers.
    pub fn phnum(&self) -> usize {
        self.phnum
    }

    /// Runtime address of the dynamic array.
    pub fn dynamic_addr(&self) -> u64 {
        self.dynamic_addr
    }

    pub(crate) fn tables(&self) -> &LinkedTables {
        &self.tables
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub(crate) fn add_ref(&mut self) {
        self.ref_count += 1;
    }

    pub(crate) fn release(&mut self) -> usize {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count
    }

    // -- bounds-checked views over live memory ------------------------------

    /// Borrow `[addr, addr + len)` when fully inside an accessible
    /// segment of this image.
    pub(crate) fn view_bytes(&self, addr: u64, len: usize) -> Option<&[u8]> {
        dynimage::view_bytes(&self.segments, addr, len)
    }

    pub(crate) fn symtab_bytes(&self) -> Option<&[u8]> {
        let addr = self.tables.symtab?;
        let wanted = self.symbol_count.checked_mul(Elf64Symbol::SIZE)?;
        let seg = self.segments.iter().find(|seg| seg.contains(&addr))?;
        let available = (seg.end - addr) as usize;
        self.view_bytes(addr, wanted.min(available))
    }

    pub(crate) fn strtab_bytes(&self) -> Option<&[u8]> {
        let addr = self.tables.strtab?;
        let seg = self.segments.iter().find(|seg| seg.contains(&addr))?;
        let available = (seg.end - addr) as usize;
        self.view_bytes(addr, self.tables.strtab_size.min(available))
    }

    fn hash_table(&self) -> Option<ElfHashTable<'_>> {
        let addr = self.tables.hash?;
        dynimage::view_to_segment_end(&self.segments, addr).and_then(ElfHashTable::parse)
    }

    fn gnu_hash_table(&self) -> Option<GnuHashTable<'_>> {
        let addr = self.tables.gnu_hash?;
        dynimage::view_to_segment_end(&self.segments, addr).and_then(GnuHashTable::parse)
    }

    /// Whether `addr..addr+len` may be written as a relocation target.
    pub(crate) fn writable_target(&self, addr: u64, len: usize) -> bool {
        self.region.contains(addr, len)
            && self
                .segments
                .iter()
                .any(|seg| seg.contains(&addr) && (len as u64) <= seg.end - addr)
    }

    // -- symbol lookup ------------------------------------------------------

    /// Decode symbol-table entry `index`.
    pub(crate) fn symbol_at(&self, index: u32) -> Option<Elf64Symbol> {
        Elf64Symbol::at_index(self.symtab_bytes()?, index).ok()
    }

    /// Read the name of a symbol out of the string table.
    pub(crate) fn symbol_name(&self, sym: &Elf64Symbol) -> Option<String> {
        minilinker_core::elf::symbol::get_string(self.strtab_bytes()?, sym.st_name)
            .ok()
            .map(Into::into)
    }

    /// Per-image lookup: GNU hash first, ELF hash next, and a linear
    /// walk only when the image has no hash table at all. Returns the
    /// symbol's runtime address.
    pub fn find_symbol(&self, name: &str) -> Option<u64> {
        let symtab = self.symtab_bytes()?;
        let strtab = self.strtab_bytes()?;

        if let Some(table) = self.gnu_hash_table() {
            if let Some((_, sym)) = table.lookup(name, symtab, strtab) {
                return Some(self.load_bias.wrapping_add(sym.st_value));
            }
        }

        if let Some(table) = self.hash_table() {
            if let Some((_, sym)) = table.lookup(name, symtab, strtab) {
                return Some(self.load_bias.wrapping_add(sym.st_value));
            }
        }

        if self.tables.hash.is_none() && self.tables.gnu_hash.is_none() {
            if let Some((_, sym)) = linear_lookup(symtab, strtab, name, self.symbol_count) {
                return Some(self.load_bias.wrapping_add(sym.st_value));
            }
        }

        None
    }

    // -- init/fini ----------------------------------------------------------

    /// Read entry `i` of a function-pointer array in image memory.
    fn func_array_entry(&self, array_addr: u64, i: usize) -> Option<u64> {
        let addr = array_addr.checked_add((i as u64) * 8)?;
        let bytes = self.view_bytes(addr, 8)?;
        Some(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    /// Invoke `DT_INIT`, then every `DT_INIT_ARRAY` entry in order.
    ///
    /// Null and all-ones entries are skipped. Called exactly once, after
    /// relocation and publication, before `open` returns.
    pub(crate) fn call_constructors(&self) {
        if let Some(init) = self.tables.init {
            if is_valid_func_ptr(init) {
                log::debug!("[linker] calling DT_INIT for {}", self.name);
                unsafe { call_func(init) };
            }
        }

        if let (Some(array), count @ 1..) = (self.tables.init_array, self.tables.init_array_count)
        {
            log::debug!(
                "[linker] calling DT_INIT_ARRAY ({count} entries) for {}",
                self.name
            );
            for i in 0..count {
                let Some(entry) = self.func_array_entry(array, i) else { break };
                if is_valid_func_ptr(entry) {
                    log::debug!("[linker] calling init_array[{i}] at {entry:#x}");
                    unsafe { call_func(entry) };
                }
            }
        }
    }

    /// Invoke every `DT_FINI_ARRAY` entry in reverse order, then
    /// `DT_FINI`. Called exactly once, when the last reference drops,
    /// before the region is unmapped.
    pub(crate) fn call_destructors(&self) {
        if let (Some(array), count @ 1..) = (self.tables.fini_array, self.tables.fini_array_count)
        {
            log::debug!(
                "[linker] calling DT_FINI_ARRAY ({count} entries) for {}",
                self.name
            );
            for i in (0..count).rev() {
                let Some(entry) = self.func_array_entry(array, i) else { continue };
                if is_valid_func_ptr(entry) {
                    log::debug!("[linker] calling fini_array[{i}] at {entry:#x}");
                    unsafe { call_func(entry) };
                }
            }
        }

        if let Some(fini) = self.tables.fini {
            if is_valid_func_ptr(fini) {
                log::debug!("[linker] calling DT_FINI for {}", self.name);
                unsafe { call_func(fini) };
            }
        }
    }
}

/// Jump to a constructor/destructor entry point.
///
/// The address must be a relocated `void (*)(void)` inside a mapped,
/// executable segment of the image.
unsafe fn call_func(addr: u64) {
    let f: extern "C" fn() = unsafe { std::mem::transmute(addr as *const ()) };
    f();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_func_ptr_sentinels() {
        assert!(!is_valid_func_ptr(0));
        assert!(!is_valid_func_ptr(u64::MAX));
        assert!(is_valid_func_ptr(0x7f00_0000_1000));
    }
}
