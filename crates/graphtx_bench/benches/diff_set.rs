//! Transaction state benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use graphtx_bench::{random_ids, shuffled};
use graphtx_kernel::state::DiffSet;
use graphtx_kernel::{CountsRecordState, LabelId};

/// Benchmark interleaved adds and removes.
fn bench_add_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_set_add_remove");

    for count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let adds = random_ids(count, count as u64);
            let removes = random_ids(count, count as u64);
            b.iter(|| {
                let mut diff = DiffSet::new();
                for (add, remove) in adds.iter().zip(&removes) {
                    diff.add(*add);
                    diff.remove(*remove);
                }
                black_box(diff.delta())
            });
        });
    }
    group.finish();
}

/// Benchmark overlaying a diff on a committed source.
fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_set_apply");

    for count in [1_000, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let source = shuffled(count);
            let mut diff = DiffSet::new();
            diff.remove_all(source.iter().copied().step_by(10));
            diff.add_all(count..count + count / 10);
            b.iter(|| black_box(diff.apply(source.iter().copied()).count()));
        });
    }
    group.finish();
}

/// Benchmark merging count deltas.
fn bench_counts(c: &mut Criterion) {
    c.bench_function("counts_add_all", |b| {
        let mut delta = CountsRecordState::new();
        for label in 0..64 {
            delta.increment_node_count(Some(LabelId::new(label)), 1);
        }
        b.iter(|| {
            let mut total = CountsRecordState::new();
            for _ in 0..16 {
                total.add_all(&delta);
            }
            black_box(total)
        });
    });
}

criterion_group!(benches, bench_add_remove, bench_apply, bench_counts);
criterion_main!(benches);
