//! Subnet planner benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ipam_common::NetworkKind;
use ipam_planner::{detect_conflicts, optimize, plan, SubnetRequirement};

fn requirements(count: usize) -> Vec<SubnetRequirement> {
    (0..count)
        .map(|i| {
            let kind = NetworkKind::ALL[i % NetworkKind::ALL.len()];
            SubnetRequirement::new(kind, 10 + (i as u32 * 37) % 900).with_priority((i % 4) as i32)
        })
        .collect()
}

fn plan_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");

    for size in [8, 64, 256].iter() {
        let reqs = requirements(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &reqs, |b, reqs| {
            b.iter(|| plan(black_box("10.0.0.0/8"), black_box(reqs)))
        });
    }

    group.finish();
}

fn optimize_benchmark(c: &mut Criterion) {
    let reqs = requirements(64);
    c.bench_function("optimize_64", |b| {
        b.iter(|| optimize(black_box("10.0.0.0/12"), black_box(&reqs)))
    });
}

fn conflict_benchmark(c: &mut Criterion) {
    let proposed: Vec<String> = (0..200).map(|i| format!("10.{}.0.0/16", i % 256)).collect();
    let existing: Vec<String> = (0..200).map(|i| format!("10.{}.128.0/17", (i * 3) % 256)).collect();

    c.bench_function("detect_conflicts_200x200", |b| {
        b.iter(|| detect_conflicts(black_box(&proposed), black_box(&existing)))
    });
}

criterion_group!(benches, plan_benchmark, optimize_benchmark, conflict_benchmark);
criterion_main!(benches);
