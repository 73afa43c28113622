//! ELF hash table algorithms and lookup.
//!
//! Two hash structures are used in ELF dynamic linking:
//! - ELF hash (System V): original, simpler, slower
//! - GNU hash: bloom-filter prefilter + faster hash, now standard
//!
//! Both tables are walked over raw little-endian byte regions, reading
//! words on demand, so the same code serves the on-disk file view and a
//! bounded view over a live mapping. Chain walks stop at the end of the
//! provided region.

use super::symbol::{Elf64Symbol, name_matches};

/// Compute the ELF (System V) hash for a symbol name.
///
/// # Algorithm
///
/// ```text
/// h = 0
/// for each byte c in name:
///     h = (h << 4) + c
///     g = h & 0xf0000000
///     if g != 0:
///         h ^= g >> 24
///     h &= ~g
/// return h
/// ```
pub fn elf_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &c in name {
        h = h.wrapping_shl(4).wrapping_add(c as u32);
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

/// Compute the GNU hash for a symbol name.
///
/// DJB variant: `h = 5381; h = h * 33 + c` per byte.
pub fn gnu_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 5381;
    for &c in name {
        h = h.wrapping_mul(33).wrapping_add(c as u32);
    }
    h
}

/// Read the `i`-th little-endian u32 word of a byte region.
fn word_at(data: &[u8], i: usize) -> Option<u32> {
    let off = i.checked_mul(4)?;
    let bytes = data.get(off..off + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read the `i`-th little-endian u64 word of a byte region.
fn word64_at(data: &[u8], i: usize) -> Option<u64> {
    let off = i.checked_mul(8)?;
    let bytes = data.get(off..off + 8)?;
    Some(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

/// ELF (System V) hash table.
///
/// Layout in 32-bit words: `nbucket`, `nchain`, `bucket[nbucket]`,
/// `chain[nchain]`. `nchain` equals the number of symbol-table entries.
#[derive(Debug, Clone, Copy)]
pub struct ElfHashTable<'a> {
    data: &'a [u8],
    nbucket: u32,
    nchain: u32,
}

impl<'a> ElfHashTable<'a> {
    /// Parse an ELF hash table header from a byte region. The region
    /// must hold the complete bucket and chain arrays.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        let nbucket = word_at(data, 0)?;
        let nchain = word_at(data, 1)?;
        if nbucket == 0 {
            return None;
        }
        let needed = 8 + (nbucket as u64 + nchain as u64) * 4;
        if needed > data.len() as u64 {
            return None;
        }
        Some(Self {
            data,
            nbucket,
            nchain,
        })
    }

    /// Number of chain entries, equal to the symbol count.
    pub fn nchain(&self) -> u32 {
        self.nchain
    }

    fn bucket(&self, i: u32) -> Option<u32> {
        word_at(self.data, 2 + i as usize)
    }

    fn chain(&self, i: u32) -> Option<u32> {
        word_at(self.data, 2 + self.nbucket as usize + i as usize)
    }

    /// Look up a defined, global-or-weak symbol by name.
    ///
    /// Returns the symbol-table index and the decoded entry. The chain
    /// walk is bounded by `nchain` links, so a corrupt cyclic chain
    /// terminates.
    pub fn lookup(
        &self,
        name: &str,
        symtab: &[u8],
        strtab: &[u8],
    ) -> Option<(u32, Elf64Symbol)> {
        let h = elf_hash(name.as_bytes());
        let mut index = self.bucket(h % self.nbucket)?;
        let mut steps = 0u32;

        while index != 0 {
            let sym = Elf64Symbol::at_index(symtab, index).ok()?;
            if sym.qualifies_for_lookup() && name_matches(&sym, strtab, name) {
                return Some((index, sym));
            }

            steps += 1;
            if steps > self.nchain {
                return None;
            }
            index = self.chain(index)?;
        }
        None
    }
}

/// GNU hash table.
///
/// Layout: four u32 header words (`nbuckets`, `symoffset`, `bloom_size`,
/// `bloom_shift`), then `bloom_size` u64 bloom words, then `nbuckets` u32
/// buckets, then the chain words. Chain entry `n - symoffset` holds the
/// symbol's hash with the low bit repurposed as the end-of-chain marker.
#[derive(Debug, Clone, Copy)]
pub struct GnuHashTable<'a> {
    data: &'a [u8],
    nbuckets: u32,
    symoffset: u32,
    bloom_size: u32,
    bloom_shift: u32,
}

impl<'a> GnuHashTable<'a> {
    /// Size of the fixed header in bytes.
    pub const HEADER_SIZE: usize = 16;

    /// Parse a GNU hash table header from a byte region.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < Self::HEADER_SIZE {
            return None;
        }
        let nbuckets = word_at(data, 0)?;
        let symoffset = word_at(data, 1)?;
        let bloom_size = word_at(data, 2)?;
        let bloom_shift = word_at(data, 3)?;
        if nbuckets == 0 {
            return None;
        }
        // The fixed parts (header, bloom words, buckets) must fit; the
        // chain array's extent is discovered by walking it.
        let fixed = Self::HEADER_SIZE as u64 + bloom_size as u64 * 8 + nbuckets as u64 * 4;
        if fixed > data.len() as u64 {
            return None;
        }
        Some(Self {
            data,
            nbuckets,
            symoffset,
            bloom_size,
            bloom_shift,
        })
    }

    fn bloom_word(&self, i: u32) -> Option<u64> {
        word64_at(&self.data[Self::HEADER_SIZE..], i as usize)
    }

    fn bucket(&self, i: u32) -> Option<u32> {
        let buckets_off = Self::HEADER_SIZE + self.bloom_size as usize * 8;
        word_at(&self.data[buckets_off.min(self.data.len())..], i as usize)
    }

    fn chain_word(&self, i: u32) -> Option<u32> {
        let chain_off =
            Self::HEADER_SIZE + self.bloom_size as usize * 8 + self.nbuckets as usize * 4;
        word_at(&self.data[chain_off.min(self.data.len())..], i as usize)
    }

    /// Check whether a symbol with the given hash might exist.
    ///
    /// `false` means the symbol is definitely absent; `true` requires a
    /// bucket walk to confirm. A table without a bloom filter cannot
    /// exclude anything.
    pub fn bloom_check(&self, hash: u32) -> bool {
        if self.bloom_size == 0 {
            return true;
        }
        let Some(word) = self.bloom_word((hash / 64) % self.bloom_size) else {
            return true;
        };
        let shifted = hash.wrapping_shr(self.bloom_shift);
        let mask = (1u64 << (hash % 64)) | (1u64 << (shifted % 64));
        word & mask == mask
    }

    /// Look up a defined, global-or-weak symbol by name.
    ///
    /// Bloom filter first, then the bucket's chain, comparing the upper
    /// 31 hash bits before the string compare. The walk ends at a chain
    /// word with the low bit set, or at the end of the table region.
    pub fn lookup(
        &self,
        name: &str,
        symtab: &[u8],
        strtab: &[u8],
    ) -> Option<(u32, Elf64Symbol)> {
        let h1 = gnu_hash(name.as_bytes());

        if !self.bloom_check(h1) {
            return None;
        }

        let mut n = self.bucket(h1 % self.nbuckets)?;
        if n == 0 || n < self.symoffset {
            return None;
        }

        loop {
            let h2 = self.chain_word(n - self.symoffset)?;
            if (h1 ^ h2) >> 1 == 0 {
                let sym = Elf64Symbol::at_index(symtab, n).ok()?;
                if sym.qualifies_for_lookup() && name_matches(&sym, strtab, name) {
                    return Some((n, sym));
                }
            }
            if h2 & 1 != 0 {
                return None;
            }
            n += 1;
        }
    }

    /// Derive the symbol count from the hash table.
    ///
    /// The GNU format does not store the count directly; the highest
    /// chained symbol index is found by walking every bucket's chain to
    /// its terminator. Used as the linear-scan bound when no ELF hash
    /// table provides `nchain`.
    pub fn symbol_count(&self) -> u32 {
        let mut max_index = self.symoffset;
        for b in 0..self.nbuckets {
            let Some(mut n) = self.bucket(b) else { continue };
            if n == 0 || n < self.symoffset {
                continue;
            }
            while let Some(h2) = self.chain_word(n - self.symoffset) {
                max_index = max_index.max(n);
                if h2 & 1 != 0 {
                    break;
                }
                n += 1;
            }
        }
        if max_index == self.symoffset && self.bucket_area_empty() {
            return self.symoffset;
        }
        max_index + 1
    }

    fn bucket_area_empty(&self) -> bool {
        (0..self.nbuckets).all(|b| self.bucket(b).unwrap_or(0) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- fixture builders ---------------------------------------------------

    fn make_symbol(name: u32, info: u8, shndx: u16, value: u64) -> [u8; 24] {
        let mut sym = [0u8; 24];
        sym[0..4].copy_from_slice(&name.to_le_bytes());
        sym[4] = info;
        sym[6..8].copy_from_slice(&shndx.to_le_bytes());
        sym[8..16].copy_from_slice(&value.to_le_bytes());
        sym
    }

    /// Symbol table: null entry, then "add" and "mul", both defined global.
    fn make_symtab() -> (Vec<u8>, &'static [u8]) {
        let strtab: &[u8] = b"\0add\0mul\0";
        let mut symtab = Vec::new();
        symtab.extend_from_slice(&make_symbol(0, 0, 0, 0));
        symtab.extend_from_slice(&make_symbol(1, 0x12, 1, 0x1000)); // add
        symtab.extend_from_slice(&make_symbol(5, 0x12, 1, 0x2000)); // mul
        (symtab, strtab)
    }

    /// One-bucket ELF hash table over the 3-entry fixture table.
    fn make_elf_hash_table() -> Vec<u8> {
        let mut words: Vec<u32> = vec![1, 3]; // nbucket, nchain
        // Both names land in the single bucket; chain 1 -> 2 -> 0.
        words.push(1); // bucket[0]
        words.push(0); // chain[0]
        words.push(2); // chain[1]
        words.push(0); // chain[2]
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// One-bucket GNU hash table over the same fixture, symoffset = 1.
    fn make_gnu_hash_table() -> Vec<u8> {
        let h_add = gnu_hash(b"add");
        let h_mul = gnu_hash(b"mul");
        let bloom_shift = 6u32;
        let bloom: u64 = (1u64 << (h_add % 64))
            | (1u64 << ((h_add >> bloom_shift) % 64))
            | (1u64 << (h_mul % 64))
            | (1u64 << ((h_mul >> bloom_shift) % 64));

        let mut bytes = Vec::new();
        for w in [1u32, 1, 1, bloom_shift] {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        bytes.extend_from_slice(&bloom.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes()); // bucket[0] -> symbol 1
        // chain: entry for symbol 1 (continues), symbol 2 (terminates)
        bytes.extend_from_slice(&(h_add & !1).to_le_bytes());
        bytes.extend_from_slice(&(h_mul | 1).to_le_bytes());
        bytes
    }

    // -- hash functions -----------------------------------------------------

    #[test]
    fn test_elf_hash_known_values() {
        assert_eq!(elf_hash(b""), 0);
        assert_eq!(elf_hash(b"printf"), 0x077905a6);
        assert_eq!(elf_hash(b"malloc"), 0x07383353);
        assert_eq!(elf_hash(b"strlen"), 0x07ab92be);
    }

    #[test]
    fn test_gnu_hash_known_values() {
        assert_eq!(gnu_hash(b""), 5381);
        assert_eq!(gnu_hash(b"malloc"), 0x0d39_ad3d);
        assert_eq!(gnu_hash(b"free"), 0x7c96_f087);
        assert_eq!(gnu_hash(b"printf"), 0x156b_2bb8);
    }

    // -- ELF hash table -----------------------------------------------------

    #[test]
    fn test_elf_hash_lookup() {
        let (symtab, strtab) = make_symtab();
        let table_bytes = make_elf_hash_table();
        let table = ElfHashTable::parse(&table_bytes).unwrap();
        assert_eq!(table.nchain(), 3);

        let (idx, sym) = table.lookup("add", &symtab, strtab).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(sym.st_value, 0x1000);

        let (idx, sym) = table.lookup("mul", &symtab, strtab).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(sym.st_value, 0x2000);

        assert!(table.lookup("missing", &symtab, strtab).is_none());
    }

    #[test]
    fn test_elf_hash_cyclic_chain_terminates() {
        let (symtab, strtab) = make_symtab();
        // bucket[0] -> 1 and chain[1] -> 1: a self-loop with no terminator.
        let words: Vec<u32> = vec![1, 3, 1, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let table = ElfHashTable::parse(&bytes).unwrap();
        assert!(table.lookup("nope", &symtab, strtab).is_none());
    }

    #[test]
    fn test_elf_hash_parse_rejects_empty() {
        assert!(ElfHashTable::parse(&[]).is_none());
        let zero_buckets: Vec<u8> = [0u32, 5].iter().flat_map(|w| w.to_le_bytes()).collect();
        assert!(ElfHashTable::parse(&zero_buckets).is_none());
    }

    // -- GNU hash table -----------------------------------------------------

    #[test]
    fn test_gnu_hash_lookup() {
        let (symtab, strtab) = make_symtab();
        let table_bytes = make_gnu_hash_table();
        let table = GnuHashTable::parse(&table_bytes).unwrap();

        let (idx, sym) = table.lookup("add", &symtab, strtab).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(sym.st_value, 0x1000);

        let (idx, sym) = table.lookup("mul", &symtab, strtab).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(sym.st_value, 0x2000);
    }

    #[test]
    fn test_gnu_bloom_rejects_absent_symbol() {
        let table_bytes = make_gnu_hash_table();
        let table = GnuHashTable::parse(&table_bytes).unwrap();

        // Find a name whose bloom bits are not both set; the fixture
        // bloom word has at most four bits set out of 64.
        let mut rejected = false;
        for candidate in ["x1", "y2", "z3", "w4", "v5"] {
            if !table.bloom_check(gnu_hash(candidate.as_bytes())) {
                rejected = true;
                break;
            }
        }
        assert!(rejected, "bloom filter never excluded any candidate");
    }

    #[test]
    fn test_gnu_symbol_count() {
        let table_bytes = make_gnu_hash_table();
        let table = GnuHashTable::parse(&table_bytes).unwrap();
        assert_eq!(table.symbol_count(), 3);
    }

    #[test]
    fn test_gnu_parse_rejects_truncated() {
        assert!(GnuHashTable::parse(&[0u8; 8]).is_none());
    }

    // -- agreement between the three lookup paths ---------------------------

    #[test]
    fn test_hash_and_linear_agree() {
        use super::super::symbol::linear_lookup;

        let (symtab, strtab) = make_symtab();
        let elf_bytes = make_elf_hash_table();
        let gnu_bytes = make_gnu_hash_table();
        let elf_table = ElfHashTable::parse(&elf_bytes).unwrap();
        let gnu_table = GnuHashTable::parse(&gnu_bytes).unwrap();

        for name in ["add", "mul"] {
            let by_elf = elf_table.lookup(name, &symtab, strtab).unwrap();
            let by_gnu = gnu_table.lookup(name, &symtab, strtab).unwrap();
            let by_scan = linear_lookup(&symtab, strtab, name, 256).unwrap();
            assert_eq!(by_elf.0, by_gnu.0);
            assert_eq!(by_gnu.0, by_scan.0);
            assert_eq!(by_elf.1.st_value, by_scan.1.st_value);
        }
    }
}
