//! Benchmarks for the consistent-hash ring.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ringkv_common::NodeId;
use ringkv_ring::ring::HashRing;

fn ring_with(nodes: usize, vnodes: u32) -> HashRing {
    HashRing::with_nodes(vnodes, (0..nodes).map(|i| NodeId::from(format!("node-{:03}", i))))
}

fn bench_successors(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_successors");

    for nodes in [3, 10, 50] {
        let ring = ring_with(nodes, 128);
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &ring, |b, ring| {
            let mut i = 0u64;
            b.iter(|| {
                let key = format!("key_{}", i);
                black_box(ring.successors(&key, 3));
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_add_node(c: &mut Criterion) {
    let ring = ring_with(10, 128);
    c.bench_function("ring_add_node_10x128", |b| {
        b.iter(|| black_box(ring.add_node(&NodeId::from("joiner"))));
    });
}

criterion_group!(benches, bench_successors, bench_add_node);
criterion_main!(benches);
