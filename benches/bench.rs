// Criterion benchmarks for crop-mask-deploy

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crop_mask_deploy::config::Settings;
use crop_mask_deploy::core::{fingerprint, named_region, render_dockerfile, resolve_models, split_into_patches, DeploymentPlan};
use std::fs;
use tempfile::TempDir;

fn model_dir(count: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    for i in 0..count {
        fs::write(dir.path().join(format!("model_{:03}.pt", i)), vec![i as u8; 64 * 1024]).unwrap();
    }
    dir
}

fn bench_resolve_models(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_models");

    for count in [1, 10, 50] {
        let dir = model_dir(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| resolve_models(black_box(dir.path()), "pt").unwrap());
        });
    }

    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let dir = model_dir(10);
    let models = resolve_models(dir.path(), "pt").unwrap();

    c.bench_function("fingerprint_10_models", |b| {
        b.iter(|| fingerprint(black_box(&models)).unwrap());
    });
}

fn bench_render_dockerfile(c: &mut Criterion) {
    let dir = model_dir(10);
    let mut settings = Settings::default();
    settings.gcp.project = "bench".to_string();
    settings.models.dir = dir.path().to_path_buf();

    let models = resolve_models(dir.path(), "pt").unwrap();
    let plan = DeploymentPlan::new(&settings, models, "digest".to_string());

    c.bench_function("render_dockerfile", |b| {
        b.iter(|| render_dockerfile(black_box(&plan)));
    });
}

fn bench_split_into_patches(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_into_patches");
    let kenya = named_region("Kenya").unwrap();

    for metres in [100_000u32, 10_000, 5_000] {
        group.bench_with_input(BenchmarkId::from_parameter(metres), &metres, |b, &metres| {
            b.iter(|| split_into_patches(black_box(&kenya), metres).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_resolve_models,
    bench_fingerprint,
    bench_render_dockerfile,
    bench_split_into_patches
);
criterion_main!(benches);
