use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use telemetry_registry::{MetricDefinition, MetricKind, MetricRegistry};
use tokio::runtime::Runtime;

/// レジストリのベンチマーク
///
/// 同一メトリクスへの競合記録と、別メトリクスへの並列記録を比較し、
/// 系列ごとのロックが効いているかを確認します。

async fn registry_with(metrics: usize) -> Arc<MetricRegistry> {
    let registry = Arc::new(MetricRegistry::default());
    for i in 0..metrics {
        registry
            .register(MetricDefinition::new(format!("metric_{}", i), MetricKind::Gauge).with_threshold(1e12))
            .await
            .unwrap();
    }
    registry
}

fn bench_record(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("record");

    for size in [100, 1000, 5000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("sequential", size), size, |b, &size| {
            b.to_async(&rt).iter(|| async {
                let registry = registry_with(1).await;
                for i in 0..size {
                    registry.record("metric_0", i as f64).await.unwrap();
                }
            })
        });

        group.bench_with_input(BenchmarkId::new("concurrent_same_metric", size), size, |b, &size| {
            b.to_async(&rt).iter(|| async {
                let registry = registry_with(1).await;
                let handles: Vec<_> = (0..size)
                    .map(|i| {
                        let registry = Arc::clone(&registry);
                        tokio::spawn(async move { registry.record("metric_0", i as f64).await })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap().unwrap();
                }
            })
        });

        group.bench_with_input(BenchmarkId::new("concurrent_distinct_metrics", size), size, |b, &size| {
            b.to_async(&rt).iter(|| async {
                let registry = registry_with(16).await;
                let handles: Vec<_> = (0..size)
                    .map(|i| {
                        let registry = Arc::clone(&registry);
                        let name = format!("metric_{}", i % 16);
                        tokio::spawn(async move { registry.record(&name, i as f64).await })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap().unwrap();
                }
            })
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("snapshot");

    for metrics in [10, 100, 1000].iter() {
        let registry = rt.block_on(async {
            let registry = registry_with(*metrics).await;
            for i in 0..*metrics {
                registry.record(&format!("metric_{}", i), 1.0).await.unwrap();
            }
            registry
        });

        group.bench_with_input(BenchmarkId::new("take", metrics), metrics, |b, _| {
            b.to_async(&rt).iter(|| async { registry.snapshot().await })
        });

        group.bench_with_input(BenchmarkId::new("to_json", metrics), metrics, |b, _| {
            b.to_async(&rt)
                .iter(|| async { registry.snapshot().await.to_json_bytes().unwrap() })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record, bench_snapshot);
criterion_main!(benches);
