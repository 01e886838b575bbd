//! Benchmarks for the orchestrator's per-event processing cost: a compiled
//! flow with a self-transition measures steady-state `send` -> published
//! `RenderSnapshot` latency.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use flowspire::compiler::{compile, FlowDocument};
use flowspire::config::OrchestratorConfig;
use flowspire::orchestrator::start;
use flowspire::registry::CapabilityRegistry;
use flowspire::snapshot::InMemorySnapshotStore;
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// A single node that assigns `width` context keys on every `PING` and
/// transitions back to itself, so repeated sends never reach a final state.
fn self_loop_document(width: usize) -> FlowDocument {
    let effects: Vec<_> = (0..width)
        .map(|i| json!({"type": "assign", "to": format!("k{i}"), "value": i}))
        .collect();
    let doc = json!({
        "id": "bench-step",
        "initial": "s",
        "context": {},
        "states": {
            "s": {"on": {"PING": {"target": "s", "actions": effects}}}
        }
    });
    serde_json::from_value(doc).unwrap()
}

fn bench_step_latency(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("orchestrator_step_latency");

    for width in [1, 10, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.to_async(&runtime).iter(|| async move {
                let registry = CapabilityRegistry::new();
                let flow = compile(&self_loop_document(width), false, &registry).unwrap();
                let actor = start(
                    flow,
                    registry,
                    Arc::new(InMemorySnapshotStore::new()),
                    OrchestratorConfig::default(),
                    false,
                )
                .await;
                let mut updates = actor.subscribe();
                // drain the initial-entry snapshot published by start()
                let _ = updates.recv().await;

                actor.send("PING", json!({}));
                let _ = updates.recv().await;
                actor.stop().await;
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_step_latency);
criterion_main!(benches);
