use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use inbox_ot::{apply, transform, transform_against_sequence, Operation};

fn draft_text(approx_chars: usize) -> String {
    let pattern = "Thanks for reaching out, we will get back to you shortly. ";
    pattern.repeat(approx_chars / pattern.len() + 1)
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("Apply");
    group.throughput(Throughput::Elements(1));

    let text = draft_text(4096);
    let mid = text.chars().count() / 2;
    let insert = Operation::insert(mid, "hello");
    let delete = Operation::delete(mid, 32);

    group.bench_function("insert_mid_4k", |b| {
        b.iter(|| black_box(apply(black_box(&text), black_box(&insert)).unwrap()))
    });
    group.bench_function("delete_mid_4k", |b| {
        b.iter(|| black_box(apply(black_box(&text), black_box(&delete)).unwrap()))
    });

    group.finish();
}

fn bench_transform_pair(c: &mut Criterion) {
    let mut group = c.benchmark_group("Transform");
    group.throughput(Throughput::Elements(1));

    let op = Operation::delete(10, 20);
    let against = Operation::replace(15, 30, "rewritten");

    group.bench_function("delete_vs_replace_overlap", |b| {
        b.iter(|| black_box(transform(black_box(&op), black_box(&against))))
    });

    group.finish();
}

fn bench_transform_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("Transform");

    // A late edit walking across 100 committed keystrokes.
    let committed: Vec<Operation> = (0..100)
        .map(|i| {
            if i % 5 == 4 {
                Operation::delete(i, 1)
            } else {
                Operation::insert(i, "k")
            }
        })
        .collect();
    let op = Operation::insert(50, "late");
    group.throughput(Throughput::Elements(committed.len() as u64));

    group.bench_function("sequence_100", |b| {
        b.iter(|| black_box(transform_against_sequence(black_box(&op), &committed)))
    });

    group.finish();
}

criterion_group!(benches, bench_apply, bench_transform_pair, bench_transform_sequence);
criterion_main!(benches);
