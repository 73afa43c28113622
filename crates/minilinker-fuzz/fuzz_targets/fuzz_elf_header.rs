#![no_main]
use libfuzzer_sys::fuzz_target;

use minilinker_core::elf::{Elf64Header, program, section};

fuzz_target!(|data: &[u8]| {
    // Header parsing must never panic or read out of bounds, and a
    // header that validates must yield table parses that fail cleanly
    // rather than crash on hostile offsets.
    let Ok(header) = Elf64Header::parse(data) else { return };
    let _ = header.validate_for_loading();

    if let Ok(phdrs) =
        program::parse_program_headers(data, header.e_phoff, header.e_phentsize, header.e_phnum)
    {
        let _ = minilinker_core::elf::load_span(&phdrs);
    }
    let _ = section::parse_section_headers(data, header.e_shoff, header.e_shentsize, header.e_shnum);
});
