use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use pulse_events::*;
use std::sync::Arc;
use std::time::Duration;

fn bench_publish(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("publish");
    group.throughput(Throughput::Elements(1));

    for subscribers in [1usize, 8, 32] {
        let bus = runtime.block_on(async {
            let bus = EventBus::with_capacity(4096).unwrap();
            for _ in 0..subscribers {
                bus.subscribe(Topic::All, |_event: Arc<Event>| async { HandlerResult::Ok(()) })
                    .unwrap();
            }
            bus
        });

        group.bench_with_input(BenchmarkId::new("fan_out", subscribers), &bus, |b, bus| {
            b.iter(|| bus.publish(Event::key_input(KeyInput::new("K"))).unwrap());
        });

        runtime.block_on(bus.stop(Duration::from_secs(5))).unwrap();
    }

    group.finish();
}

fn bench_filter(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();
    let mut group = c.benchmark_group("filter");

    let filter = EventFilterManager::new();
    filter.set_rule(EventType::KeyInput, Some(FilterRule::max_per_second(1_000)));
    group.bench_function("should_pass_limited", |b| {
        b.iter(|| filter.should_pass(&EventType::KeyInput));
    });
    group.bench_function("should_pass_unlimited", |b| {
        b.iter(|| filter.should_pass(&EventType::Clipboard));
    });

    group.finish();
}

fn bench_batcher(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("batcher");
    group.throughput(Throughput::Elements(1));

    let (batcher, mut output) = runtime.block_on(async {
        let batcher = EventBatcher::start(BatcherConfig {
            input_capacity: 1 << 16,
            output_capacity: 1 << 10,
            ..BatcherConfig::default()
        })
        .unwrap();
        let output = batcher.output().unwrap();
        (batcher, output)
    });
    let drain = runtime.spawn(async move { while output.recv().await.is_some() {} });

    let event = Arc::new(Event::key_input(KeyInput::new("K")));
    group.bench_function("add", |b| {
        b.iter(|| batcher.add(Arc::clone(&event)));
    });

    runtime.block_on(async {
        batcher.stop().await;
        drain.await.unwrap();
    });
    group.finish();
}

criterion_group!(benches, bench_publish, bench_filter, bench_batcher);
criterion_main!(benches);
