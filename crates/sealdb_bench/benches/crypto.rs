//! Sealing and key derivation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sealdb_bench::utils::random_data;
use sealdb_core::crypto::{derive_key, AuthenticatedCipher, KeyMaterial, Salt};
use sealdb_core::DEFAULT_KDF_ITERATIONS;

/// Benchmark sealing whole database images.
fn bench_seal(c: &mut Criterion) {
    let mut group = c.benchmark_group("seal");
    let cipher = AuthenticatedCipher::new(&KeyMaterial::generate());

    for size in [4096, 65536, 1 << 20, 8 << 20].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let data = random_data(size);
            b.iter(|| {
                let sealed = cipher.seal(black_box(&data)).unwrap();
                black_box(sealed);
            });
        });
    }

    group.finish();
}

/// Benchmark opening sealed images.
fn bench_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("open");
    let cipher = AuthenticatedCipher::new(&KeyMaterial::generate());

    for size in [4096, 65536, 1 << 20, 8 << 20].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let sealed = cipher.seal(&random_data(size)).unwrap();
            b.iter(|| {
                let plaintext = cipher.open(black_box(sealed.as_bytes())).unwrap();
                black_box(plaintext);
            });
        });
    }

    group.finish();
}

/// Benchmark PBKDF2 at the default and reduced iteration counts.
fn bench_derive_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive_key");
    group.sample_size(10);
    let salt = Salt::generate();

    for iterations in [10_000, DEFAULT_KDF_ITERATIONS].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(iterations),
            iterations,
            |b, &iterations| {
                b.iter(|| {
                    let key = derive_key(black_box("correct-horse"), &salt, iterations);
                    black_box(key);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_seal, bench_open, bench_derive_key);
criterion_main!(benches);
