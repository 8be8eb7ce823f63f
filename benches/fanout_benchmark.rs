//! Notification fan-out benchmarks
//!
//! Measures the synchronous part of a send (target snapshot, one envelope
//! serialisation, task spawns) and the time until every delivery landed.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use unichat::realtime::testing::{MockPeer, mock_pair};
use unichat::{ConnectionRegistry, Conversation, ConversationEvent, EntityScope, UserId};

const ENTITY: EntityScope = EntityScope::Entity(42);

fn populated(rt: &Runtime, subscribers: i64) -> (Arc<ConnectionRegistry>, Vec<MockPeer>) {
    rt.block_on(async {
        let registry = Arc::new(ConnectionRegistry::default());
        let mut peers = Vec::with_capacity(subscribers as usize);
        for user in 0..subscribers {
            let (transport, peer) = mock_pair();
            if registry
                .register("Conversation", ENTITY, UserId::new(user), transport)
                .await
                .is_ok()
            {
                peers.push(peer);
            }
        }
        (registry, peers)
    })
}

async fn wait_for_deliveries(registry: &ConnectionRegistry, target: u64) {
    while registry.stats().delivered_total < target {
        tokio::task::yield_now().await;
    }
}

fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(3));
    group.warm_up_time(Duration::from_secs(1));

    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => panic!("failed to build runtime: {e}"),
    };
    let message = json!({"id": 1, "text": "benchmark message"});

    for subscribers in [10_i64, 100, 1_000] {
        let (registry, mut peers) = populated(&rt, subscribers);
        let recipients: HashSet<UserId> = (0..subscribers).map(UserId::new).collect();
        let context = registry.context::<Conversation>(None);
        let (registry_ref, context_ref, recipients_ref, message_ref) =
            (&registry, &context, &recipients, &message);

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::new("delivered", subscribers),
            &subscribers,
            |b, _| {
                b.to_async(&rt).iter(|| async move {
                    let before = registry_ref.stats().delivered_total;
                    let started = context_ref.send_to_users(
                        ENTITY,
                        recipients_ref,
                        ConversationEvent::NewMessage,
                        Some(message_ref),
                    );
                    wait_for_deliveries(registry_ref, before + started as u64).await;
                })
            },
        );

        // Sent frames pile up in the mock channels.
        for peer in &mut peers {
            peer.drain();
        }

        group.bench_with_input(
            BenchmarkId::new("dispatch_only", subscribers),
            &subscribers,
            |b, _| {
                b.to_async(&rt).iter(|| async move {
                    std::hint::black_box(context_ref.send_to_users(
                        ENTITY,
                        recipients_ref,
                        ConversationEvent::NewMessage,
                        Some(message_ref),
                    ))
                })
            },
        );

        rt.block_on(registry.shutdown());
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => panic!("failed to build runtime: {e}"),
    };
    let (registry, _peers) = populated(&rt, 1_000);

    c.bench_function("registry_contains", |b| {
        let mut user = 0_i64;
        b.iter(|| {
            user = (user + 1) % 1_000;
            std::hint::black_box(registry.contains("Conversation", ENTITY, UserId::new(user)))
        })
    });
}

criterion_group!(benches, bench_fanout, bench_lookup);
criterion_main!(benches);
