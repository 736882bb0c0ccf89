//! Catalogue benchmarks.
//!
//! Run with: `cargo bench -p sharefs-files`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use sharefs_files::catalogue::{CatalogueEntry, Listing};
use sharefs_files::{ObjectInfo, ObjectType, Presentation, ShareConfig, ShareManager, StaticMimeMap};
use std::net::Ipv4Addr;
use std::sync::Arc;

const PEER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

fn entries(count: usize) -> Vec<CatalogueEntry> {
    (0..count)
        .map(|i| CatalogueEntry {
            info: ObjectInfo {
                ft_word: 0xFFFF_FF00,
                date_word: i as u32,
                length: 1024,
                access: 0x33,
                object_type: ObjectType::File,
            },
            name: format!("file_{i:06}").into_bytes(),
        })
        .collect()
}

fn bench_listing_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("listing_build");

    for count in [10, 100, 1000, 10_000] {
        let list = entries(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("entries", count), &list, |b, list| {
            b.iter(|| black_box(Listing::build(list)))
        });
    }

    group.finish();
}

fn bench_catalogue_directory(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalogue_directory");

    for count in [10, 500] {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..count {
            std::fs::write(dir.path().join(format!("item{i},fff")), b"x").unwrap();
        }
        let mgr = ShareManager::new(Arc::new(StaticMimeMap::default()));
        let mut cfg = ShareConfig::new("bench", dir.path());
        cfg.presentation = Presentation::Truncate;
        mgr.add_share(cfg).unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(BenchmarkId::new("files", count), |b| {
            b.iter(|| black_box(mgr.catalogue(b"bench", PEER).unwrap()))
        });
    }

    group.finish();
}

fn bench_jenkins(c: &mut Criterion) {
    let path = b"/srv/shares/documents/projects/2024/reports";
    c.bench_function("jenkins_dir_handle", |b| {
        b.iter(|| sharefs_wire::jenkins_one_at_a_time(black_box(path)))
    });
}

criterion_group!(
    benches,
    bench_listing_build,
    bench_catalogue_directory,
    bench_jenkins
);
criterion_main!(benches);
