//! Performance benchmarks for data-port protocol handling

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use sharefs_files::catalogue::{CatalogueEntry, Listing, Trailer};
use sharefs_files::{CatalogueCache, Continuation, ObjectInfo, ObjectType};
use sharefs_wire::{Command, Frame, FrameBuilder, MAX_BLOCK, Opcode};
use std::net::Ipv4Addr;

const PEER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 7);

/// Benchmark building and parsing write-data blocks
fn bench_data_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_frames");

    for size in [512usize, 2048, MAX_BLOCK] {
        let block = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("build", size), &block, |b, block| {
            b.iter(|| {
                FrameBuilder::new(Command::WriteData, 0x12_3456)
                    .word(black_box(0x4000))
                    .bytes(block)
                    .build()
            })
        });

        let frame = FrameBuilder::new(Command::WriteData, 0x12_3456)
            .word(0x4000)
            .bytes(&block)
            .build();
        group.bench_with_input(BenchmarkId::new("parse", size), &frame, |b, frame| {
            b.iter(|| {
                let parsed = Frame::parse(black_box(frame)).unwrap();
                let mut r = parsed.reader();
                let offset = r.word().unwrap();
                black_box((offset, r.remaining().len()))
            })
        });
    }

    group.finish();
}

/// Benchmark request decoding as the server sees it
fn bench_request_decode(c: &mut Criterion) {
    let request = FrameBuilder::request(Command::Request, 0x1001, Opcode::OpenRead)
        .string(b"Documents.Projects.Reports.Summary/txt")
        .build();

    c.bench_function("request_decode", |b| {
        b.iter(|| {
            let frame = Frame::parse(black_box(&request)).unwrap();
            let mut r = frame.reader();
            let opcode = Opcode::try_from(r.word().unwrap()).unwrap();
            black_box((opcode, r.lenient_string()))
        })
    });
}

/// Benchmark serving a parked listing through its continuations and
/// decoding each reply's trailer
fn bench_continuations(c: &mut Criterion) {
    let entries: Vec<CatalogueEntry> = (0..5_000)
        .map(|i| CatalogueEntry {
            info: ObjectInfo {
                ft_word: 0xFFFF_F000,
                date_word: i,
                length: 1024,
                access: 0x33,
                object_type: ObjectType::File,
            },
            name: format!("file_{i:05}").into_bytes(),
        })
        .collect();
    let listing = Listing::build(&entries);
    let rest: Vec<Vec<u8>> = listing.chunks[1..].to_vec();
    let trailer = Trailer {
        date_word: 0,
        rounded_len: listing.rounded_length(),
        access: 0x33,
        share_context: 0,
        dir_handle: 4,
        first_len: listing.chunk_lens[0] as u32,
        marker: 0,
    };

    let mut group = c.benchmark_group("catalogue_continuations");
    group.throughput(Throughput::Bytes(listing.total_entry_bytes as u64));
    group.bench_function("serve", |b| {
        b.iter(|| {
            let mut cache = CatalogueCache::new();
            let mut marker = cache.store(4, PEER, rest.clone());
            let mut served = 0;
            while let Continuation::Chunk { bytes, marker: next } = cache.next(4, PEER, marker) {
                served += bytes.len();
                marker = next;
            }
            black_box(served)
        })
    });
    group.bench_function("trailer_roundtrip", |b| {
        b.iter(|| {
            let mut w = sharefs_wire::WordWriter::with_capacity(32);
            black_box(&trailer).encode(&mut w);
            let bytes = w.finish();
            Trailer::decode(&mut sharefs_wire::WordReader::new(&bytes)).unwrap()
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_data_frames,
    bench_request_decode,
    bench_continuations
);
criterion_main!(benches);
