use std::hint::black_box;

use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use throttling::LifoSemaphore;
use throttling::ThrottlingConfiguration;
use throttling::ThrottlingEssentials;
use throttling::ThrottlingPriority;
use throttling::ThrottlingProperties;
use throttling::ThrottlingProvider;
use throttling::quotas::PropertyQuotaOptions;

fn bench_semaphore_fast_path(c: &mut Criterion) {
    let semaphore = LifoSemaphore::new(1_000).unwrap();

    c.bench_function("semaphore_acquire_release", |b| {
        b.iter(|| {
            let acquire = semaphore.acquire();
            black_box(acquire.is_ready());
            semaphore.release();
        });
    });
}

fn bench_throttle_immediate(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let provider = runtime.block_on(async {
        ThrottlingProvider::new(
            ThrottlingConfiguration::builder()
                .essentials(ThrottlingEssentials { capacity_limit: Some(10_000), ..Default::default() })
                .consumer_quota(PropertyQuotaOptions::default())
                .build(),
        )
    });
    let properties = ThrottlingProperties::builder().consumer(Some("bench")).consumer_id(Some("bench")).method(Some("GET")).build();

    c.bench_function("throttle_passed_immediately", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let result = provider.throttle(black_box(&properties), None, ThrottlingPriority::Ordinary).await.unwrap();
                black_box(result.is_passed());
            })
        });
    });

    c.bench_function("throttle_consumer_passed_immediately", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let result = provider.throttle_consumer(black_box("bench"), None, ThrottlingPriority::Critical).await.unwrap();
                black_box(result.is_passed());
            })
        });
    });
}

criterion_group!(benches, bench_semaphore_fast_path, bench_throttle_immediate);
criterion_main!(benches);
