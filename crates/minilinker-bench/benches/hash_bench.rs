//! Symbol hashing and hash-table lookup benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use minilinker_core::elf::{ElfHashTable, elf_hash, gnu_hash};

fn bench_hash_functions(c: &mut Criterion) {
    let lengths: &[usize] = &[4, 8, 16, 32, 64, 128];
    let mut group = c.benchmark_group("hash");

    for &len in lengths {
        let name: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
        group.throughput(Throughput::Bytes(len as u64));

        group.bench_with_input(BenchmarkId::new("elf_hash", len), &name, |b, name| {
            b.iter(|| black_box(elf_hash(black_box(name))));
        });
        group.bench_with_input(BenchmarkId::new("gnu_hash", len), &name, |b, name| {
            b.iter(|| black_box(gnu_hash(black_box(name))));
        });
    }
    group.finish();
}

/// Synthetic symbol table + SysV hash table with `count` single-chain
/// buckets, mirroring the layout a small shared object carries.
fn build_fixture(count: u32) -> (Vec<u8>, Vec<u8>, Vec<u8>, Vec<String>) {
    let mut strtab = vec![0u8];
    let mut symtab = vec![0u8; 24]; // null entry
    let mut names = Vec::new();

    for i in 1..=count {
        let name = format!("exported_symbol_{i}");
        let name_off = strtab.len() as u32;
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
        names.push(name);

        let mut sym = [0u8; 24];
        sym[0..4].copy_from_slice(&name_off.to_le_bytes());
        sym[4] = 0x12; // GLOBAL | FUNC
        sym[6] = 1; // defined
        sym[8..16].copy_from_slice(&(0x1000u64 * i as u64).to_le_bytes());
        symtab.extend_from_slice(&sym);
    }

    let nbucket = count.max(1);
    let nchain = count + 1;
    let mut buckets = vec![0u32; nbucket as usize];
    let mut chains = vec![0u32; nchain as usize];
    for (i, name) in names.iter().enumerate() {
        let index = i as u32 + 1;
        let bucket = (elf_hash(name.as_bytes()) % nbucket) as usize;
        chains[index as usize] = buckets[bucket];
        buckets[bucket] = index;
    }

    let mut hash_bytes = Vec::new();
    for w in [nbucket, nchain].iter().chain(buckets.iter()).chain(chains.iter()) {
        hash_bytes.extend_from_slice(&w.to_le_bytes());
    }

    (hash_bytes, symtab, strtab, names)
}

fn bench_elf_hash_lookup(c: &mut Criterion) {
    let sizes: &[u32] = &[16, 128, 1024];
    let mut group = c.benchmark_group("elf_hash_lookup");

    for &size in sizes {
        let (hash_bytes, symtab, strtab, names) = build_fixture(size);
        let table = ElfHashTable::parse(&hash_bytes).expect("fixture table parses");
        let probe = &names[names.len() / 2];

        group.bench_with_input(BenchmarkId::new("hit", size), &size, |b, _| {
            b.iter(|| black_box(table.lookup(black_box(probe), &symtab, &strtab)));
        });
        group.bench_with_input(BenchmarkId::new("miss", size), &size, |b, _| {
            b.iter(|| black_box(table.lookup(black_box("no_such_symbol"), &symtab, &strtab)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_hash_functions, bench_elf_hash_lookup);
criterion_main!(benches);
