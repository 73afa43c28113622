//! Segment mapper: reserve-then-overlay loading of PT_LOAD segments.
//!
//! A single contiguous anonymous region with no access rights is reserved
//! for the image's whole load span; each loadable segment is then overlaid
//! at its fixed offset inside the reservation with `MAP_FIXED`, and the
//! BSS is realized by zeroing the file tail and mapping anonymous pages.
//! Gaps keep the reservation's `PROT_NONE`, so nothing in the region is
//! left partially accessible.

use std::io;
use std::ops::Range;
use std::os::unix::io::AsRawFd;
use std::ptr;

use minilinker_core::elf::{Elf64ProgramHeader, load_span};

use crate::error::{LinkerError, LinkerResult};
use crate::image::ElfImage;

/// Page size on x86_64 Linux.
pub const PAGE_SIZE: u64 = 4096;

/// Round down to a page boundary.
pub const fn page_start(x: u64) -> u64 {
    x & !(PAGE_SIZE - 1)
}

/// Round up to a page boundary.
pub const fn page_end(x: u64) -> u64 {
    page_start(x.wrapping_add(PAGE_SIZE - 1))
}

/// Offset within the page.
pub const fn page_offset(x: u64) -> u64 {
    x & (PAGE_SIZE - 1)
}

/// Page-aligned load span of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLayout {
    /// Smallest loadable `p_vaddr`, floored to a page boundary.
    pub min_vaddr: u64,
    /// Total reservation size: page-ceiled max minus floored min.
    pub load_size: u64,
}

impl LoadLayout {
    /// Compute the layout from the program-header table.
    pub fn compute(headers: &[Elf64ProgramHeader]) -> LinkerResult<Self> {
        let (min_vaddr, max_vaddr) = load_span(headers)?;
        let min_vaddr = page_start(min_vaddr);
        let max_vaddr = page_end(max_vaddr);
        let load_size = max_vaddr - min_vaddr;
        if load_size == 0 {
            return Err(LinkerError::BadFormat("empty load span".into()));
        }
        Ok(Self {
            min_vaddr,
            load_size,
        })
    }
}

/// An owned, contiguous reservation in the process address space.
///
/// Created inaccessible; segments are overlaid into it. Unmapped in full
/// on drop, which is also the unwind path for failed loads.
#[derive(Debug)]
pub struct MappedRegion {
    base: *mut u8,
    size: usize,
}

// The region is exclusively owned for its whole lifetime; the raw base
// pointer is never aliased by another MappedRegion.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Reserve `size` bytes of inaccessible private anonymous memory.
    pub fn reserve(size: usize) -> LinkerResult<Self> {
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(LinkerError::MapFailure(format!(
                "reserve {size:#x} bytes: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(Self {
            base: base.cast(),
            size,
        })
    }

    /// Starting address of the reservation.
    pub fn base(&self) -> u64 {
        self.base as u64
    }

    /// Byte length of the reservation.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether `addr..addr+len` lies inside the reservation.
    pub fn contains(&self, addr: u64, len: usize) -> bool {
        let base = self.base();
        let end = base + self.size as u64;
        addr >= base && addr <= end && len as u64 <= end - addr
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.cast(), self.size);
        }
    }
}

/// Result of mapping an image: the owned region plus the runtime
/// addresses the dynamic interpreter needs.
#[derive(Debug)]
pub struct MappedImage {
    /// The reservation hosting all segments.
    pub region: MappedRegion,
    /// `region.base() - page_start(min_vaddr)`; added to every
    /// ELF-declared virtual address to get a runtime address.
    pub load_bias: u64,
    /// Runtime address of the program-header table.
    pub phdr_addr: u64,
    /// Number of program headers.
    pub phnum: usize,
    /// Runtime address of the dynamic array, when present.
    pub dynamic_addr: Option<u64>,
    /// Runtime page ranges made accessible by the overlay; everything
    /// else in the region stays `PROT_NONE`.
    pub segments: Vec<Range<u64>>,
}

/// Map every loadable segment of `image` into a fresh reservation.
pub fn map_image(image: &ElfImage) -> LinkerResult<MappedImage> {
    let layout = LoadLayout::compute(image.program_headers())?;
    let region = MappedRegion::reserve(layout.load_size as usize)?;
    let load_bias = region.base().wrapping_sub(layout.min_vaddr);

    log::debug!(
        "[linker] {}: base={:#x} load_bias={:#x} size={:#x}",
        image.name(),
        region.base(),
        load_bias,
        layout.load_size
    );

    let fd = image.file().as_raw_fd();
    let mut segments = Vec::new();

    for ph in image.program_headers().iter().filter(|ph| ph.is_load()) {
        map_segment(ph, load_bias, fd, image.name())?;
        let seg_start = load_bias.wrapping_add(ph.p_vaddr);
        segments.push(page_start(seg_start)..page_end(seg_start + ph.p_memsz));

        let flags = ph.p_flags.display();
        log::debug!(
            "[linker] {}: segment vaddr={:#x} memsz={:#x} flags={}{}{}",
            image.name(),
            ph.p_vaddr,
            ph.p_memsz,
            flags[0],
            flags[1],
            flags[2]
        );
    }

    // Runtime address of the program headers: PT_PHDR when the image
    // provides one, otherwise derived from e_phoff.
    let phdr_addr = image
        .program_headers()
        .iter()
        .find(|ph| ph.is_phdr())
        .map(|ph| load_bias.wrapping_add(ph.p_vaddr))
        .unwrap_or_else(|| load_bias.wrapping_add(image.header().e_phoff));

    let dynamic_addr = image
        .program_headers()
        .iter()
        .find(|ph| ph.is_dynamic())
        .map(|ph| load_bias.wrapping_add(ph.p_vaddr));

    Ok(MappedImage {
        region,
        load_bias,
        phdr_addr,
        phnum: image.program_headers().len(),
        dynamic_addr,
        segments,
    })
}

/// Overlay one loadable segment and realize its BSS.
fn map_segment(
    ph: &Elf64ProgramHeader,
    load_bias: u64,
    fd: i32,
    name: &str,
) -> LinkerResult<()> {
    let seg_start = load_bias.wrapping_add(ph.p_vaddr);
    let seg_end = seg_start + ph.p_memsz;
    let seg_page_start = page_start(seg_start);
    let seg_page_end = page_end(seg_end);
    let seg_file_end = seg_start + ph.p_filesz;
    let file_page_start = page_start(ph.p_offset);
    let prot = ph.p_flags.to_mmap_prot();

    // Overlay the file content. A zero-length extent (a BSS-only
    // segment) has nothing to map from the file.
    let file_len = seg_file_end - seg_page_start;
    if file_len > 0 {
        let addr = unsafe {
            libc::mmap(
                seg_page_start as *mut libc::c_void,
                file_len as usize,
                prot,
                libc::MAP_PRIVATE | libc::MAP_FIXED,
                fd,
                file_page_start as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(LinkerError::MapFailure(format!(
                "{name}: segment overlay at {seg_page_start:#x}: {}",
                io::Error::last_os_error()
            )));
        }
    }

    if ph.p_memsz > ph.p_filesz {
        // Zero the file tail up to the next page boundary: those bytes
        // are file-backed but belong to the zero region.
        let zero_start = seg_file_end;
        let zero_page_end = page_end(zero_start);
        if file_len > 0 && ph.p_flags.is_writable() && zero_start < zero_page_end {
            unsafe {
                ptr::write_bytes(
                    zero_start as *mut u8,
                    0,
                    (zero_page_end - zero_start) as usize,
                );
            }
        }

        // Whole zero pages come from a fresh anonymous overlay.
        let anon_start = if file_len > 0 { zero_page_end } else { seg_page_start };
        if seg_page_end > anon_start {
            let addr = unsafe {
                libc::mmap(
                    anon_start as *mut libc::c_void,
                    (seg_page_end - anon_start) as usize,
                    prot,
                    libc::MAP_PRIVATE | libc::MAP_FIXED | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if addr == libc::MAP_FAILED {
                return Err(LinkerError::MapFailure(format!(
                    "{name}: BSS overlay at {anon_start:#x}: {}",
                    io::Error::last_os_error()
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use minilinker_core::elf::{ProgramFlags, ProgramType};

    fn load_header(vaddr: u64, filesz: u64, memsz: u64) -> Elf64ProgramHeader {
        Elf64ProgramHeader {
            p_type: ProgramType::Load,
            p_flags: ProgramFlags(ProgramFlags::PF_R),
            p_offset: vaddr,
            p_vaddr: vaddr,
            p_paddr: vaddr,
            p_filesz: filesz,
            p_memsz: memsz,
            p_align: PAGE_SIZE,
        }
    }

    #[test]
    fn test_page_math() {
        assert_eq!(page_start(0x1234), 0x1000);
        assert_eq!(page_end(0x1234), 0x2000);
        assert_eq!(page_offset(0x1234), 0x234);
        assert_eq!(page_start(0x1000), 0x1000);
        assert_eq!(page_end(0x1000), 0x1000);
        assert_eq!(page_end(0x1001), 0x2000);
    }

    #[test]
    fn test_layout_compute() {
        let headers = vec![
            load_header(0x0, 0x800, 0x800),
            load_header(0x2500, 0x100, 0x900),
        ];
        let layout = LoadLayout::compute(&headers).unwrap();
        assert_eq!(layout.min_vaddr, 0);
        // max = page_end(0x2500 + 0x900) = page_end(0x2e00) = 0x3000
        assert_eq!(layout.load_size, 0x3000);
    }

    #[test]
    fn test_layout_requires_load_segment() {
        let mut header = load_header(0x1000, 0x10, 0x10);
        header.p_type = ProgramType::Dynamic;
        assert!(matches!(
            LoadLayout::compute(&[header]),
            Err(LinkerError::BadFormat(_))
        ));
    }

    #[test]
    fn test_reserve_and_release() {
        let region = MappedRegion::reserve(0x4000).unwrap();
        assert_ne!(region.base(), 0);
        assert_eq!(region.base() % PAGE_SIZE, 0);
        assert_eq!(region.size(), 0x4000);
        assert!(region.contains(region.base(), 0x4000));
        assert!(region.contains(region.base() + 0x3ff8, 8));
        assert!(!region.contains(region.base() + 0x3ff9, 8));
        assert!(!region.contains(region.base() - 1, 1));
    }
}
