//! Benchmarks for free list allocation and header/key codecs

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rootio::buffer::{RBuffer, WBuffer};
use rootio::header::{K_BEGIN, K_START_BIG_FILE};
use rootio::{FreeList, Header, Key};

fn benchmark_sequential_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("free_list_allocate");

    for count in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let mut list = FreeList::with_block(K_BEGIN, K_START_BIG_FILE);
                for i in 0..count {
                    black_box(list.allocate(64 + (i % 512) as i64));
                }
            });
        });
    }

    group.finish();
}

fn benchmark_fragmented_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("free_list_reuse");

    for count in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let mut list = FreeList::with_block(K_BEGIN, K_START_BIG_FILE);
                let records: Vec<i64> = (0..count).filter_map(|_| list.allocate(256)).collect();
                // every other record freed leaves count/2 gaps
                for seek in records.iter().step_by(2) {
                    list.release(*seek, seek + 255);
                }
                for _ in 0..count / 2 {
                    black_box(list.allocate(black_box(200)));
                }
            });
        });
    }

    group.finish();
}

fn benchmark_header_codec(c: &mut Criterion) {
    let mut header = Header::new();
    header.end = 123_456;
    header.seek_info = 120_000;
    header.nbytes_info = 3000;
    let bytes = header.to_bytes().unwrap();

    c.bench_function("header_encode", |b| {
        b.iter(|| black_box(&header).to_bytes().unwrap())
    });
    c.bench_function("header_decode", |b| {
        b.iter(|| Header::decode(black_box(&bytes)).unwrap())
    });
}

fn benchmark_key_codec(c: &mut Criterion) {
    let key = Key::new("hpx", "px distribution", "TH1F", 4096, false);
    let mut w = WBuffer::new();
    key.marshal(&mut w);
    let bytes = w.into_bytes().unwrap();

    c.bench_function("key_unmarshal", |b| {
        b.iter(|| Key::unmarshal(&mut RBuffer::new(black_box(&bytes))).unwrap())
    });
}

criterion_group!(
    benches,
    benchmark_sequential_allocate,
    benchmark_fragmented_reuse,
    benchmark_header_codec,
    benchmark_key_codec
);
criterion_main!(benches);
