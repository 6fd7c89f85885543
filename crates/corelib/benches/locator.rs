use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use corelib::{LocatorBuilder, LocatorConfig, Node};

fn bench_get_node(c: &mut Criterion) {
    let locator = LocatorBuilder::new()
        .add_nodes((0..16).map(|i| Node::from_endpoint(format!("10.0.0.{}:11211", i))))
        .build();

    c.bench_function("get_node/16x256", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = i.wrapping_add(1);
            black_box(locator.get_node(&format!("user:{}", i)))
        })
    });
}

fn bench_get_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_nodes");
    for parallel_threshold in [usize::MAX, 1024] {
        let locator = LocatorBuilder::new()
            .with_config(LocatorConfig {
                parallel_threshold,
                ..LocatorConfig::default()
            })
            .add_nodes((0..8).map(|i| Node::from_endpoint(format!("10.0.0.{}:11211", i))))
            .build();
        let keys: Vec<String> = (0..20_000).map(|i| format!("session:{}", i)).collect();
        let label = if parallel_threshold == usize::MAX { "sequential" } else { "parallel" };
        group.bench_with_input(BenchmarkId::new(label, keys.len()), &keys, |b, keys| {
            b.iter(|| black_box(locator.get_nodes(keys, 0)))
        });
    }
    group.finish();
}

fn bench_rebuild(c: &mut Criterion) {
    c.bench_function("add_remove_node/8x256", |b| {
        let locator = LocatorBuilder::new()
            .add_nodes((0..8).map(|i| Node::from_endpoint(format!("10.0.0.{}:11211", i))))
            .build();
        b.iter(|| {
            locator.add_node(Node::from_endpoint("10.0.1.1:11211"));
            locator.remove_node("10.0.1.1:11211");
        })
    });
}

criterion_group!(benches, bench_get_node, bench_get_nodes, bench_rebuild);
criterion_main!(benches);
