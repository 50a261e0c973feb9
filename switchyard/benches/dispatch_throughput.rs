//! Benchmarks for dispatch throughput using criterion.
//!
//! These benchmarks measure how fast a dispatcher cycle drains a channel:
//! - Drain a prefilled channel into a no-op endpoint at several ceilings
//! - Executor submit and complete round trip
//! - Full bus delivery of a batch through the scheduler

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use switchyard::*;
use tokio::runtime::Runtime;

/// Endpoint that returns immediately, isolating dispatch overhead.
struct NoopEndpoint;

#[async_trait]
impl Endpoint<u64> for NoopEndpoint {
    async fn invoke(&self, _message: Message<u64>) -> anyhow::Result<()> {
        Ok(())
    }
}

fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

fn drain_policy() -> ConsumerPolicy {
    ConsumerPolicy::new()
        .with_max_messages_per_task(-1)
        .expect("valid policy")
        .with_receive_timeout_millis(0)
        .with_rejection_limit_wait_millis(1)
}

async fn wait_idle(executor: &EndpointExecutor) {
    while executor.active_count() > 0 {
        tokio::task::yield_now().await;
    }
}

/// Benchmark: drain a channel of 1000 messages in one cycle.
///
/// Varies the executor ceiling to show the cost of rejection retries when
/// slots run out.
fn bench_drain_cycle(c: &mut Criterion) {
    let rt = create_runtime();
    let batch = 1_000u64;

    let mut group = c.benchmark_group("drain_cycle");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(10));
    group.throughput(Throughput::Elements(batch));

    for max_concurrency in [1usize, 8, 64] {
        group.bench_with_input(
            BenchmarkId::new("max_concurrency", max_concurrency),
            &max_concurrency,
            |b, &max_concurrency| {
                let channel = Arc::new(PointToPointChannel::<u64>::new(batch as usize));
                let executor = Arc::new(
                    EndpointExecutor::new("noop", 1, max_concurrency).expect("valid executor"),
                );
                let task = DispatcherTask::<u64>::new(
                    "bench",
                    channel.clone(),
                    "noop",
                    Arc::new(NoopEndpoint),
                    executor.clone(),
                    drain_policy(),
                );
                let token = ShutdownToken::new();

                b.to_async(&rt).iter(|| async {
                    for i in 0..batch {
                        channel.send(Message::new(i), Duration::ZERO).await;
                    }
                    let dispatched = task.run(&token).await.expect("cycle should succeed");
                    assert_eq!(dispatched as u64, batch);
                    wait_idle(&executor).await;
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: single executor submission.
fn bench_executor_submit(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("executor_submit");
    group.sample_size(100);

    group.bench_function("noop", |b| {
        let executor = EndpointExecutor::new("noop", 1, 16).expect("valid executor");
        let endpoint: Arc<dyn Endpoint<u64>> = Arc::new(NoopEndpoint);

        b.to_async(&rt).iter(|| async {
            let task = EndpointTask::new("noop", Arc::clone(&endpoint), Message::new(1));
            let handle = executor.execute(task).expect("slot available");
            handle.wait().await;
        });
    });

    group.finish();
}

/// Benchmark: end-to-end delivery of 100 messages through a running bus.
fn bench_bus_delivery(c: &mut Criterion) {
    let rt = create_runtime();
    let batch = 100u64;

    let mut group = c.benchmark_group("bus_delivery");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));
    group.throughput(Throughput::Elements(batch));

    group.bench_function("continuous", |b| {
        let channel = Arc::new(PointToPointChannel::<u64>::new(batch as usize));
        let bus = MessageBus::<u64>::default();
        bus.register_channel("in", channel.clone());
        bus.register_endpoint("noop", Arc::new(NoopEndpoint))
            .expect("register endpoint");
        let policy = drain_policy()
            .with_period(0)
            .with_receive_timeout_millis(5);
        bus.activate_subscription(Subscription::new("in", "noop", policy))
            .expect("activate subscription");
        rt.block_on(async { bus.start() }).expect("start bus");

        b.to_async(&rt).iter(|| async {
            for i in 0..batch {
                channel.send(Message::new(i), Duration::ZERO).await;
            }
            while !channel.is_empty() || bus.get_active_count_for_endpoint("noop") > 0 {
                tokio::task::yield_now().await;
            }
        });

        rt.block_on(bus.shutdown());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_drain_cycle,
    bench_executor_submit,
    bench_bus_delivery
);
criterion_main!(benches);
