//! Benchmarks for tailor-sdk core operations.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tailor_sdk::core::types::ServiceConfig;
use tailor_sdk::core::{discovery, hasher, parser, shapes};

fn bench_hash_string(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_string");
    for size in [64, 1024, 16384] {
        let input = "x".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(hasher::hash_string(black_box(input))));
        });
    }
    group.finish();
}

fn bench_composite_hash(c: &mut Criterion) {
    let parts: Vec<String> = (0..32).map(|i| hasher::hash_string(&i.to_string())).collect();
    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    c.bench_function("composite_hash_32", |b| {
        b.iter(|| black_box(hasher::composite_hash(black_box(&refs))));
    });
}

const CONFIG: &str = r#"
name: bench
env: { STAGE: bench }
applications:
  - name: app
    db:
      main: { files: ["db/**/*.yaml"] }
      analytics: { files: ["analytics/*.yaml"] }
    resolver:
      main: { files: ["resolvers/*.yaml"] }
    auth:
      name: app-auth
      user_profile: { type: User, username_field: email }
executor:
  files: ["executors/*.yaml"]
generators:
  - "@tailor-sdk/db-type"
  - { id: "@tailor-sdk/seed", options: { include_generated: true } }
"#;

fn bench_config_parse_validate(c: &mut Criterion) {
    c.bench_function("config_parse_validate", |b| {
        b.iter(|| {
            let config = parser::parse_config(black_box(CONFIG)).unwrap();
            black_box(parser::validate_config(&config, &["@tailor-sdk/db-type", "@tailor-sdk/seed"]));
        });
    });
}

fn bench_type_shape(c: &mut Criterion) {
    let mut group = c.benchmark_group("type_shape_validate");
    for fields in [4, 32, 128] {
        let mut yaml = String::from("name: Wide\ntimestamps: true\nfields:\n");
        for i in 0..fields {
            yaml.push_str(&format!("  field{i}: {{ type: string, required: false }}\n"));
        }
        let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(&yaml).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(fields), &value, |b, value| {
            b.iter(|| black_box(shapes::type_shape().validate(black_box(value)).is_ok()));
        });
    }
    group.finish();
}

fn bench_discovery(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..200 {
        let sub = dir.path().join(format!("db/group{}", i % 10));
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join(format!("type{i}.yaml")), "name: T\nfields: {}\n").unwrap();
        std::fs::write(sub.join(format!("type{i}.test.yaml")), "name: T\nfields: {}\n").unwrap();
    }
    let config = ServiceConfig {
        files: vec!["db/**/*.yaml".to_string()],
        ignores: None,
    };
    c.bench_function("discover_400_files", |b| {
        b.iter(|| black_box(discovery::discover(dir.path(), &config).len()));
    });
}

criterion_group!(
    benches,
    bench_hash_string,
    bench_composite_hash,
    bench_config_parse_validate,
    bench_type_shape,
    bench_discovery
);
criterion_main!(benches);
