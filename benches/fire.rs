use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use kyronotify::{
    CategoryDescriptor, FnListener, ListenerHandle, NotificationRepository, PassthroughConnector, Severity,
};

fn repository(listeners: usize) -> NotificationRepository {
    let repo = NotificationRepository::new("bench-host", Arc::new(PassthroughConnector)).unwrap();
    repo.enable_category(
        "cpu-high",
        CategoryDescriptor::builder("cpu.load")
            .severity(Severity::Warning)
            .option("threshold", 0.9)
            .build()
            .unwrap(),
    )
    .unwrap();
    // Categories that never match keep the registry scan honest.
    for i in 0..32 {
        repo.enable_category(&format!("disk-{i}"), CategoryDescriptor::new(format!("disk.{i}")).unwrap())
            .unwrap();
    }
    for i in 0..listeners {
        let listener: ListenerHandle = Arc::new(FnListener::new(format!("noop-{i}"), |m, _| {
            criterion::black_box(m.sequence);
            Ok(())
        }));
        repo.subscribe(listener, None, None).unwrap();
    }
    repo
}

fn bench_fire(c: &mut Criterion) {
    let mut group = c.benchmark_group("fire");
    for listeners in [1usize, 8, 64] {
        let repo = repository(listeners);
        group.throughput(Throughput::Elements(listeners as u64));
        group.bench_with_input(BenchmarkId::new("sequential", listeners), &repo, |b, repo| {
            b.iter(|| repo.fire("cpu.load", "load above threshold", json!(null)).unwrap());
        });
    }
    group.finish();
}

fn bench_mailbox(c: &mut Criterion) {
    let repo = repository(0);
    let mailbox = repo.new_mailbox(1024).unwrap();
    c.bench_function("fire_into_mailbox_and_drain", |b| {
        b.iter(|| {
            for _ in 0..64 {
                repo.fire("cpu.load", "tick", json!(null)).unwrap();
            }
            criterion::black_box(mailbox.drain().len())
        });
    });
}

fn bench_unmatched(c: &mut Criterion) {
    let repo = repository(8);
    c.bench_function("fire_unmatched", |b| {
        b.iter(|| repo.fire("net.rx", "nobody listens", json!(null)).unwrap());
    });
}

criterion_group!(benches, bench_fire, bench_mailbox, bench_unmatched);
criterion_main!(benches);
