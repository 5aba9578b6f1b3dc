//! Benchmarks for the cost centers of the disk index: how fan-out (page
//! size) shapes insert throughput, how the expanding-box k-NN behaves when
//! the query point sits far from the data, and what logical deletion and a
//! full rebuild cost once tombstones have piled up.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rtree_store::{RTree, RTreeConfig};
use std::hint::black_box;
use tempfile::{tempdir, TempDir};

const POPULATION: i64 = 5000;

/// A populated index: `POPULATION` points on a spiral-ish lattice so leaves
/// split unevenly instead of filling in raster order.
fn populated(page_size: u32) -> (RTree, TempDir) {
    let dir = tempdir().unwrap();
    let tree = RTree::open(RTreeConfig::new(dir.path()).page_size(page_size)).unwrap();
    for i in 0..POPULATION {
        tree.insert(&lattice_point(i), b"bench").unwrap();
    }
    (tree, dir)
}

fn lattice_point(i: i64) -> [i64; 2] {
    [(i * 37) % 500, (i * 61) % 500]
}

/// Insert cost as a function of fan-out: small pages mean cheap writes but
/// frequent splits, large pages the reverse.
fn bench_insert_by_page_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(1000));

    for page_size in [128u32, 1024, 8192] {
        group.bench_with_input(
            BenchmarkId::new("page_size", page_size),
            &page_size,
            |b, &page_size| {
                b.iter_with_setup(
                    || {
                        let dir = tempdir().unwrap();
                        let tree =
                            RTree::open(RTreeConfig::new(dir.path()).page_size(page_size))
                                .unwrap();
                        (tree, dir)
                    },
                    |(tree, _dir)| {
                        for i in 0..1000 {
                            tree.insert(&lattice_point(i), b"bench").unwrap();
                        }
                        black_box(tree.stats().nodes_written)
                    },
                );
            },
        );
    }

    group.finish();
}

/// The k-NN search box grows outward from the query point, so a query in
/// the middle of the data terminates in a round or two while one far
/// outside pays for many expansion rounds before the box covers the root.
fn bench_knn_near_and_far(c: &mut Criterion) {
    let mut group = c.benchmark_group("knn");
    let (tree, _dir) = populated(1024);

    group.bench_function("centered", |b| {
        b.iter(|| black_box(tree.search_knn(10, &[250, 250]).unwrap()));
    });
    group.bench_function("edge", |b| {
        b.iter(|| black_box(tree.search_knn(10, &[0, 499]).unwrap()));
    });
    group.bench_function("far_outside", |b| {
        b.iter(|| black_box(tree.search_knn(10, &[2000, 2000]).unwrap()));
    });

    group.finish();
}

/// Window and point lookups against the same populated index, selective
/// and broad, so descent pruning and leaf resolution both show up.
fn bench_lookups(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    let (tree, _dir) = populated(1024);

    group.bench_function("point", |b| {
        b.iter(|| black_box(tree.search_point(&lattice_point(POPULATION / 2)).unwrap()));
    });
    group.bench_function("window_narrow", |b| {
        b.iter(|| black_box(tree.search_window(&[240, 240], &[260, 260]).unwrap()));
    });
    group.bench_function("window_full", |b| {
        b.iter(|| black_box(tree.search_window(&[0, 0], &[500, 500]).unwrap()));
    });

    group.finish();
}

/// Delete is a point search plus a leaf rewrite and a tombstone; rebuild
/// rewrites both files end to end. Measured together because rebuild is
/// the recovery path for tombstone buildup.
fn bench_delete_and_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("maintenance");
    group.sample_size(10);

    group.bench_function("delete_500", |b| {
        b.iter_with_setup(
            || populated(1024),
            |(tree, _dir)| {
                for i in 0..500 {
                    tree.delete(&lattice_point(i * 7)).unwrap();
                }
                black_box(tree.stats().nodes_written)
            },
        );
    });

    group.bench_function("rebuild_after_deletes", |b| {
        b.iter_with_setup(
            || {
                let (tree, dir) = populated(1024);
                for i in 0..500 {
                    tree.delete(&lattice_point(i * 7)).unwrap();
                }
                (tree, dir)
            },
            |(tree, _dir)| {
                tree.rebuild().unwrap();
                black_box(tree.stats().highest_node_id)
            },
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_insert_by_page_size,
    bench_knn_near_and_far,
    bench_lookups,
    bench_delete_and_rebuild
);
criterion_main!(benches);
