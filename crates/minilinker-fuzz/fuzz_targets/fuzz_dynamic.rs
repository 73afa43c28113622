#![no_main]
use libfuzzer_sys::fuzz_target;

use minilinker_core::elf::{DynamicInfo, ElfHashTable, GnuHashTable, parse_dynamic_entries};

fuzz_target!(|data: &[u8]| {
    // Dynamic arrays and hash tables come straight from mapped file
    // content; arbitrary bytes must parse or fail without panicking.
    let entries = parse_dynamic_entries(data);
    let info = DynamicInfo::collect(&entries);
    let _ = info.validate();

    if let Some(table) = ElfHashTable::parse(data) {
        let _ = table.lookup("probe", data, data);
    }
    if let Some(table) = GnuHashTable::parse(data) {
        let _ = table.lookup("probe", data, data);
        let _ = table.symbol_count();
    }
});
