//! Records storage benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fsrecords_bench::{open_storage, populated_storage};
use fsrecords_storage::{RecordField, StorageKind};
use tempfile::TempDir;

const RECORDS: u32 = 10_000;

/// Benchmark record allocation.
fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_record");
    group.sample_size(50);

    for kind in StorageKind::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            let temp_dir = TempDir::new().unwrap();
            let storage = open_storage(kind, &temp_dir.path().join("records.dat"));

            b.iter(|| {
                let id = storage.allocate_record().unwrap();
                black_box(id);
            });
            storage.close().unwrap();
        });
    }

    group.finish();
}

/// Benchmark int field writes spread over the record array.
fn bench_set_int(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_int");
    group.throughput(Throughput::Elements(u64::from(RECORDS)));

    for kind in StorageKind::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            let temp_dir = TempDir::new().unwrap();
            let storage = populated_storage(kind, &temp_dir.path().join("records.dat"), RECORDS);

            b.iter(|| {
                for id in 1..=RECORDS {
                    storage
                        .set_int(black_box(id), RecordField::Flags, id as i32)
                        .unwrap();
                }
            });
            storage.close().unwrap();
        });
    }

    group.finish();
}

/// Benchmark int and long field reads.
fn bench_get_fields(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_fields");
    group.throughput(Throughput::Elements(u64::from(RECORDS)));

    for kind in StorageKind::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            let temp_dir = TempDir::new().unwrap();
            let storage = populated_storage(kind, &temp_dir.path().join("records.dat"), RECORDS);
            for id in 1..=RECORDS {
                storage.set_long(id, RecordField::Length, i64::from(id) * 512).unwrap();
            }

            b.iter(|| {
                let mut sum = 0i64;
                for id in 1..=RECORDS {
                    sum += i64::from(storage.get_int(id, RecordField::ModCount).unwrap());
                    sum += storage.get_long(id, RecordField::Length).unwrap();
                }
                black_box(sum);
            });
            storage.close().unwrap();
        });
    }

    group.finish();
}

/// Benchmark force after a batch of writes.
fn bench_force(c: &mut Criterion) {
    let mut group = c.benchmark_group("force");
    group.sample_size(20);

    for kind in StorageKind::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            let temp_dir = TempDir::new().unwrap();
            let storage = populated_storage(kind, &temp_dir.path().join("records.dat"), RECORDS);

            b.iter(|| {
                for id in (1..=RECORDS).step_by(97) {
                    storage.set_int(id, RecordField::Parent, 1).unwrap();
                }
                storage.force().unwrap();
            });
            storage.close().unwrap();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_allocate, bench_set_int, bench_get_fields, bench_force);
criterion_main!(benches);
