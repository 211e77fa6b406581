//! Performance benchmarks for a3s-activity
//!
//! Run with: cargo bench

use a3s_activity::{ActivityEvent, EventProducer, EventStore, MemoryLog, ProducerSettings};
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn bench_event_serialization(c: &mut Criterion) {
    let event = ActivityEvent::new("user-42", "page_view")
        .with_metadata("path", "/checkout")
        .with_metadata("referrer", "search");

    c.bench_function("ActivityEvent to_payload", |b| {
        b.iter(|| event.to_payload().unwrap());
    });

    let payload = event.to_payload().unwrap();
    c.bench_function("ActivityEvent from_payload", |b| {
        b.iter(|| ActivityEvent::from_payload(&payload).unwrap());
    });
}

fn bench_memory_publish(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let producer = EventProducer::new(
        Arc::new(MemoryLog::default()),
        "user-activity-events",
        ProducerSettings::default(),
    );

    c.bench_function("EventProducer publish (memory)", |b| {
        b.to_async(&rt).iter(|| async {
            producer
                .publish(&ActivityEvent::new("user-42", "click"))
                .await
                .unwrap()
        });
    });
}

fn bench_publish_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("publish_throughput");
    for count in [10, 100, 1000] {
        group.bench_function(format!("{} events", count), |b| {
            b.to_async(&rt).iter(|| async {
                let producer = EventProducer::new(
                    Arc::new(MemoryLog::default()),
                    "user-activity-events",
                    ProducerSettings::default(),
                );
                for i in 0..count {
                    let event = ActivityEvent::new(format!("user-{}", i % 16), "click");
                    producer.publish(&event).await.unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_store_queries(c: &mut Criterion) {
    let store = EventStore::new();
    for i in 0..10_000 {
        let event_type = if i % 3 == 0 { "login" } else { "click" };
        store.add(ActivityEvent::new(format!("user-{}", i % 100), event_type));
    }

    c.bench_function("EventStore add", |b| {
        b.iter(|| store.add(ActivityEvent::new("user-bench", "click")));
    });

    c.bench_function("EventStore by_user", |b| {
        b.iter(|| store.by_user("user-7"));
    });

    c.bench_function("EventStore by_type", |b| {
        b.iter(|| store.by_type("LOGIN"));
    });
}

criterion_group!(
    benches,
    bench_event_serialization,
    bench_memory_publish,
    bench_publish_throughput,
    bench_store_queries,
);
criterion_main!(benches);
