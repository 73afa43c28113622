//! Dynamic-section interpretation over a live mapping.
//!
//! Walks the in-memory dynamic array of a freshly mapped image and turns
//! every recognized tag into a runtime address (through the load bias) or
//! a count. All reads go through bounds-checked views confined to the
//! address ranges the mapper actually made accessible, so a malformed
//! table cannot reach the reservation's `PROT_NONE` gaps.

use std::ops::Range;

use minilinker_core::elf::{
    DynamicInfo, ElfHashTable, GnuHashTable, parse_dynamic_entries,
};

use crate::error::{LinkerError, LinkerResult};
use crate::image::ElfImage;
use crate::mapper::MappedImage;

/// Linear-scan bound when an image carries no hash table at all.
pub(crate) const DEFAULT_SYMBOL_CAP: usize = 256;

/// Runtime addresses and counts of everything the dynamic array names.
///
/// The image-relative pointers of [`DynamicInfo`] with the load bias
/// applied.
#[derive(Debug, Clone, Default)]
pub(crate) struct LinkedTables {
    pub symtab: Option<u64>,
    pub strtab: Option<u64>,
    pub strtab_size: usize,
    pub hash: Option<u64>,
    pub gnu_hash: Option<u64>,
    pub rela: Option<u64>,
    pub rela_count: usize,
    pub plt_rela: Option<u64>,
    pub plt_rela_count: usize,
    pub init: Option<u64>,
    pub fini: Option<u64>,
    pub init_array: Option<u64>,
    pub init_array_count: usize,
    pub fini_array: Option<u64>,
    pub fini_array_count: usize,
}

impl LinkedTables {
    fn from_info(info: &DynamicInfo, load_bias: u64) -> Self {
        let bias = |v: Option<u64>| v.map(|addr| load_bias.wrapping_add(addr));
        Self {
            symtab: bias(info.symtab),
            strtab: bias(info.strtab),
            strtab_size: info.strtab_size as usize,
            hash: bias(info.hash),
            gnu_hash: bias(info.gnu_hash),
            rela: bias(info.rela),
            rela_count: info.rela_count,
            plt_rela: bias(info.plt_rela),
            plt_rela_count: info.plt_rela_count,
            init: bias(info.init),
            fini: bias(info.fini),
            init_array: bias(info.init_array),
            init_array_count: info.init_array_count,
            fini_array: bias(info.fini_array),
            fini_array_count: info.fini_array_count,
        }
    }
}

/// Borrow `[addr, addr + len)` from the mapped segments.
///
/// Returns `None` when the range is not fully contained in a single
/// accessible segment.
pub(crate) fn view_bytes(segments: &[Range<u64>], addr: u64, len: usize) -> Option<&[u8]> {
    let seg = segments.iter().find(|seg| seg.contains(&addr))?;
    if (len as u64) > seg.end - addr {
        return None;
    }
    // In bounds of an accessible segment owned by the caller's region.
    Some(unsafe { std::slice::from_raw_parts(addr as *const u8, len) })
}

/// Borrow from `addr` to the end of its containing segment. Used for the
/// hash tables, whose exact extent is not recorded in the dynamic array.
pub(crate) fn view_to_segment_end(segments: &[Range<u64>], addr: u64) -> Option<&[u8]> {
    let seg = segments.iter().find(|seg| seg.contains(&addr))?;
    view_bytes(segments, addr, (seg.end - addr) as usize)
}

/// Interpret the dynamic array of a mapped image.
///
/// Returns the biased tables plus the symbol count (ELF-hash `nchain`
/// when available, the GNU table's derived count otherwise, and a fixed
/// cap when the image has no hash table).
pub(crate) fn interpret_dynamic(
    mapped: &MappedImage,
    image: &ElfImage,
) -> LinkerResult<(LinkedTables, usize)> {
    let dynamic_addr = mapped
        .dynamic_addr
        .ok_or_else(|| LinkerError::BadFormat("no dynamic section".into()))?;

    let dyn_phdr = image
        .program_headers()
        .iter()
        .find(|ph| ph.is_dynamic())
        .ok_or_else(|| LinkerError::BadFormat("no dynamic section".into()))?;

    let dyn_bytes = view_bytes(
        &mapped.segments,
        dynamic_addr,
        dyn_phdr.p_memsz as usize,
    )
    .ok_or_else(|| {
        LinkerError::BadFormat("dynamic array outside mapped segments".into())
    })?;

    let info = DynamicInfo::collect(&parse_dynamic_entries(dyn_bytes));
    info.validate()?;

    let tables = LinkedTables::from_info(&info, mapped.load_bias);
    let symbol_count = derive_symbol_count(&tables, &mapped.segments);

    Ok((tables, symbol_count))
}

fn derive_symbol_count(tables: &LinkedTables, segments: &[Range<u64>]) -> usize {
    if let Some(addr) = tables.hash {
        if let Some(table) = view_to_segment_end(segments, addr).and_then(ElfHashTable::parse) {
            return table.nchain() as usize;
        }
    }
    if let Some(addr) = tables.gnu_hash {
        if let Some(table) = view_to_segment_end(segments, addr).and_then(GnuHashTable::parse) {
            return table.symbol_count() as usize;
        }
    }
    DEFAULT_SYMBOL_CAP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_bytes_bounds() {
        // A heap buffer standing in for a mapped segment.
        let buf = vec![0xAAu8; 0x100];
        let base = buf.as_ptr() as u64;
        let segments = vec![base..base + 0x100];

        let view = view_bytes(&segments, base + 0x10, 0x20).unwrap();
        assert_eq!(view.len(), 0x20);
        assert!(view.iter().all(|&b| b == 0xAA));

        // Crossing the end of the segment is rejected.
        assert!(view_bytes(&segments, base + 0xF0, 0x11).is_none());
        // An address outside every segment is rejected.
        assert!(view_bytes(&segments, base + 0x100, 1).is_none());

        let tail = view_to_segment_end(&segments, base + 0xF0).unwrap();
        assert_eq!(tail.len(), 0x10);
    }
}
