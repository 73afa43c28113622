//! Eager relocation application.
//!
//! Walks the image's RELA and PLT-RELA tables and patches every target.
//! Value computation is pure (`minilinker_core::elf::relocation`); this
//! module resolves the symbol operand and performs the store. PLT entries
//! are bound eagerly; there is no lazy path.

use minilinker_core::elf::{Elf64Rela, RelocationAction, relocation_action};

use crate::error::{LinkerError, LinkerResult};
use crate::linker::LoadPolicy;
use crate::soinfo::SharedObject;

/// Apply all relocations of `so`.
///
/// `resolve_global` looks a name up across the published images and the
/// host namespace; it is consulted for references the image does not
/// define itself. Unresolved non-weak references follow `policy`:
/// lenient mode logs and writes zero, strict mode fails the load.
pub(crate) fn relocate(
    so: &SharedObject,
    resolve_global: &dyn Fn(&str) -> Option<u64>,
    policy: &LoadPolicy,
) -> LinkerResult<()> {
    let tables = so.tables().clone();

    if let (Some(rela), count @ 1..) = (tables.rela, tables.rela_count) {
        apply_table(so, rela, count, resolve_global, policy)?;
    }
    if let (Some(plt), count @ 1..) = (tables.plt_rela, tables.plt_rela_count) {
        apply_table(so, plt, count, resolve_global, policy)?;
    }
    Ok(())
}

fn apply_table(
    so: &SharedObject,
    table_addr: u64,
    count: usize,
    resolve_global: &dyn Fn(&str) -> Option<u64>,
    policy: &LoadPolicy,
) -> LinkerResult<()> {
    let table = so
        .view_bytes(table_addr, count * Elf64Rela::SIZE)
        .ok_or_else(|| {
            LinkerError::BadFormat("relocation table outside mapped segments".into())
        })?
        .to_vec();

    for index in 0..count {
        let reloc = Elf64Rela::at_index(&table, index)?;
        apply_one(so, &reloc, resolve_global, policy)?;
    }
    Ok(())
}

/// Resolve the symbol operand S for a relocation entry.
///
/// Entries without a symbol use zero. A locally defined symbol resolves
/// to `load_bias + st_value`; everything else goes through the global
/// resolver. A miss on a weak reference yields zero; a miss on a
/// non-weak reference is policy-dependent.
fn resolve_symbol(
    so: &SharedObject,
    reloc: &Elf64Rela,
    resolve_global: &dyn Fn(&str) -> Option<u64>,
    policy: &LoadPolicy,
) -> LinkerResult<(u64, u64)> {
    let sym_index = reloc.symbol_index();
    if sym_index == 0 {
        return Ok((0, 0));
    }

    let sym = so.symbol_at(sym_index).ok_or_else(|| {
        LinkerError::BadFormat(format!("relocation references symbol {sym_index} out of range"))
    })?;

    if sym.is_defined() {
        return Ok((so.load_bias().wrapping_add(sym.st_value), sym.st_size));
    }

    let name = so.symbol_name(&sym).unwrap_or_default();
    match resolve_global(&name) {
        Some(addr) => Ok((addr, sym.st_size)),
        None if sym.is_weak() => Ok((0, sym.st_size)),
        None => {
            if policy.strict_unresolved {
                return Err(LinkerError::NotFound(format!(
                    "unresolved symbol during relocation: {name}"
                )));
            }
            log::warn!("[linker] cannot find symbol: {name}");
            Ok((0, sym.st_size))
        }
    }
}

fn apply_one(
    so: &SharedObject,
    reloc: &Elf64Rela,
    resolve_global: &dyn Fn(&str) -> Option<u64>,
    policy: &LoadPolicy,
) -> LinkerResult<()> {
    let (sym_addr, sym_size) = resolve_symbol(so, reloc, resolve_global, policy)?;
    let target = so.load_bias().wrapping_add(reloc.r_offset);

    match relocation_action(reloc, sym_addr, so.load_bias()) {
        RelocationAction::Skip => Ok(()),
        RelocationAction::Write64(value) => {
            if !so.writable_target(target, 8) {
                return Err(LinkerError::BadFormat(format!(
                    "relocation target {target:#x} outside mapped segments"
                )));
            }
            unsafe {
                (target as *mut u64).write_unaligned(value);
            }
            Ok(())
        }
        RelocationAction::CopyFromSymbol => {
            let len = sym_size as usize;
            if len == 0 || sym_addr == 0 {
                return Ok(());
            }
            if !so.writable_target(target, len) {
                return Err(LinkerError::BadFormat(format!(
                    "copy relocation target {target:#x} outside mapped segments"
                )));
            }
            unsafe {
                std::ptr::copy_nonoverlapping(sym_addr as *const u8, target as *mut u8, len);
            }
            Ok(())
        }
        RelocationAction::Unknown(t) => {
            log::warn!("[linker] unsupported relocation type: {t}");
            Ok(())
        }
    }
}
