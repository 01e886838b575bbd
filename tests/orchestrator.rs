//! End-to-end orchestrator scenarios (§8): one `#[tokio::test]` per
//! documented scenario, driving a compiled flow through a real [`Actor`]
//! handle rather than calling the engine's internals directly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use flowspire::compiler::CompiledFlow;
use flowspire::config::OrchestratorConfig;
use flowspire::orchestrator::{start, LifecycleState};
use flowspire::registry::CapabilityRegistry;
use flowspire::snapshot::InMemorySnapshotStore;
use serde_json::json;

use common::{compile_flow, registry_with_http, Outcome, ScriptedHttpService};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

/// Scenario 1: linear happy path, `a -> b -> c`, `c` final, further events
/// dropped once it's reached.
#[tokio::test]
async fn scenario_1_linear_happy_path() {
    let flow: CompiledFlow = compile_flow(
        json!({
            "id": "L",
            "initial": "a",
            "context": {},
            "states": {
                "a": {"on": {"NEXT": "b"}},
                "b": {"on": {"NEXT": "c"}},
                "c": {"type": "final"}
            }
        }),
        &CapabilityRegistry::new(),
    );
    let actor = start(
        flow,
        CapabilityRegistry::new(),
        Arc::new(InMemorySnapshotStore::new()),
        OrchestratorConfig::default(),
        false,
    )
    .await;
    settle().await;
    assert_eq!(actor.get_snapshot().await.unwrap().state.active_node, "a");

    actor.send("NEXT", json!({}));
    settle().await;
    let snapshot = actor.get_snapshot().await.unwrap();
    assert_eq!(snapshot.state.active_node, "b");
    // "b" is the active node and hasn't been left yet, so it has no
    // history entry of its own: history stops at "a".
    let history: Vec<_> = snapshot.state.history.iter().map(|h| (h.node.clone(), h.cause.clone())).collect();
    assert_eq!(history, vec![("a".to_string(), "INIT".to_string())]);

    actor.send("NEXT", json!({}));
    settle().await;
    let snapshot = actor.get_snapshot().await.unwrap();
    assert_eq!(snapshot.state.active_node, "c");
    assert_eq!(snapshot.lifecycle, LifecycleState::Final);
    // The active node is not yet historical: `history` stops at the last
    // node actually left.
    let history: Vec<_> = snapshot.state.history.iter().map(|h| (h.node.clone(), h.cause.clone())).collect();
    assert_eq!(history, vec![("a".to_string(), "INIT".to_string()), ("b".to_string(), "NEXT".to_string())]);

    // Further events are dropped once a final node is active.
    actor.send("NEXT", json!({}));
    settle().await;
    let snapshot = actor.get_snapshot().await.unwrap();
    assert_eq!(snapshot.state.active_node, "c");
}

/// Scenario 2: conditional branch picks `r` with a `branch` effect when
/// `context.score > 80`, otherwise falls back to `default: "u"`.
#[tokio::test]
async fn scenario_2_conditional_branch_taken_when_score_is_high() {
    let doc = json!({
        "id": "Q",
        "initial": "q",
        "context": {"score": 90},
        "states": {
            "q": {"on": {"NEXT": {"target": {"default": "u", "conditions": [
                {"if": {">": [{"var": "context.score"}, 80]}, "to": "r", "effects": [
                    {"type": "assign", "to": "branch", "value": "risky"}
                ]}
            ]}}}},
            "r": {"type": "final"},
            "u": {"type": "final"}
        }
    });
    let flow = compile_flow(doc, &CapabilityRegistry::new());
    let actor = start(
        flow,
        CapabilityRegistry::new(),
        Arc::new(InMemorySnapshotStore::new()),
        OrchestratorConfig::default(),
        false,
    )
    .await;
    settle().await;
    actor.send("NEXT", json!({}));
    settle().await;
    let snapshot = actor.get_snapshot().await.unwrap();
    assert_eq!(snapshot.state.active_node, "r");
    assert_eq!(snapshot.state.context.get("branch"), Some(&json!("risky")));
}

#[tokio::test]
async fn scenario_2_conditional_branch_falls_back_to_default_when_score_is_low() {
    let doc = json!({
        "id": "Q2",
        "initial": "q",
        "context": {"score": 50},
        "states": {
            "q": {"on": {"NEXT": {"target": {"default": "u", "conditions": [
                {"if": {">": [{"var": "context.score"}, 80]}, "to": "r", "effects": [
                    {"type": "assign", "to": "branch", "value": "risky"}
                ]}
            ]}}}},
            "r": {"type": "final"},
            "u": {"type": "final"}
        }
    });
    let flow = compile_flow(doc, &CapabilityRegistry::new());
    let actor = start(
        flow,
        CapabilityRegistry::new(),
        Arc::new(InMemorySnapshotStore::new()),
        OrchestratorConfig::default(),
        false,
    )
    .await;
    settle().await;
    actor.send("NEXT", json!({}));
    settle().await;
    let snapshot = actor.get_snapshot().await.unwrap();
    assert_eq!(snapshot.state.active_node, "u");
    assert_eq!(snapshot.state.context.get("branch"), None);
}

/// Scenario 3: an `http` action with `cacheTtlMs` and `mapResult` issues
/// exactly one service call across two triggering events within the ttl.
#[tokio::test]
async fn scenario_3_http_map_result_and_cache() {
    let service = Arc::new(ScriptedHttpService::new(vec![Outcome::Ok(json!({"status": "OK"}))]));
    let registry = registry_with_http(Arc::clone(&service));
    let doc = json!({
        "id": "V",
        "initial": "start",
        "context": {},
        "states": {
            "start": {"on": {"VERIFY": {"target": "start", "actions": [{
                "type": "http",
                "method": "POST",
                "url": "/api/verify",
                "cache_ttl_ms": 60000,
                "map_result": {"session.status": "$.status"}
            }]}}}
        }
    });
    let flow = compile_flow(doc, &registry);
    let actor = start(
        flow,
        registry,
        Arc::new(InMemorySnapshotStore::new()),
        OrchestratorConfig::default(),
        false,
    )
    .await;
    settle().await;

    actor.send("VERIFY", json!({}));
    settle().await;
    let snapshot = actor.get_snapshot().await.unwrap();
    assert_eq!(snapshot.state.context.get("session").unwrap().get("status"), Some(&json!("OK")));

    actor.send("VERIFY", json!({}));
    settle().await;
    assert_eq!(service.calls(), 1, "second trigger within ttl must hit the cache");
}

/// Scenario 4: retry-then-success issues exactly `max + 1` invocations and
/// takes at least the minimum backoff time before completing.
#[tokio::test]
async fn scenario_4_retry_then_success() {
    let service = Arc::new(ScriptedHttpService::new(vec![
        Outcome::Network,
        Outcome::Network,
        Outcome::Ok(json!({"status": "OK"})),
    ]));
    let registry = registry_with_http(Arc::clone(&service));
    let doc = json!({
        "id": "R",
        "initial": "start",
        "context": {},
        "states": {
            "start": {"on": {"GO": {"target": "done", "actions": [{
                "type": "http",
                "method": "POST",
                "url": "/api/retry",
                "retry": {"max": 2, "backoff_ms": 10, "max_backoff_ms": 50}
            }]}}},
            "done": {"type": "final"}
        }
    });
    let flow = compile_flow(doc, &registry);
    let actor = start(
        flow,
        registry,
        Arc::new(InMemorySnapshotStore::new()),
        OrchestratorConfig::default(),
        false,
    )
    .await;
    settle().await;

    let started = std::time::Instant::now();
    actor.send("GO", json!({}));
    settle().await;

    assert_eq!(actor.get_snapshot().await.unwrap().state.active_node, "done");
    assert_eq!(service.calls(), 3);
    assert!(started.elapsed() >= Duration::from_millis(20));
}

/// Scenario 5: a `block`-severity `beforeNext` http failure leaves the
/// active node unchanged and records one classified error.
#[tokio::test]
async fn scenario_5_block_severity_keeps_the_active_node() {
    let service = Arc::new(ScriptedHttpService::new(vec![Outcome::Status(500)]));
    let registry = registry_with_http(Arc::clone(&service));
    let doc = json!({
        "id": "B",
        "initial": "start",
        "context": {},
        "states": {
            "start": {
                "before_next": [{
                    "type": "http",
                    "method": "POST",
                    "url": "/api/charge",
                    "severity": "block",
                    "expect": {"status": [200]}
                }],
                "on": {"NEXT": "done"}
            },
            "done": {"type": "final"}
        }
    });
    let flow = compile_flow(doc, &registry);
    let actor = start(
        flow,
        registry,
        Arc::new(InMemorySnapshotStore::new()),
        OrchestratorConfig::default(),
        false,
    )
    .await;
    settle().await;

    let mut updates = actor.subscribe();
    actor.send("NEXT", json!({}));
    settle().await;

    let snapshot = actor.get_snapshot().await.unwrap();
    assert_eq!(snapshot.state.active_node, "start");
    assert_eq!(snapshot.state.errors.len(), 1);
    assert_eq!(snapshot.state.errors[0].error.kind.label(), "HttpStatusError");

    let published = updates.recv().await.unwrap();
    assert_eq!(published.state.active_node, "start");
}

/// Scenario 6: `BACK` pops history through `allowBack` nodes; a third
/// `BACK` past the root is a no-op.
#[tokio::test]
async fn scenario_6_back_navigation() {
    let doc = json!({
        "id": "Nav",
        "initial": "a",
        "context": {},
        "states": {
            "a": {"on": {"NEXT": "b"}},
            "b": {"allow_back": true, "on": {"NEXT": "c"}},
            "c": {"allow_back": true, "on": {}}
        }
    });
    let flow = compile_flow(doc, &CapabilityRegistry::new());
    let actor = start(
        flow,
        CapabilityRegistry::new(),
        Arc::new(InMemorySnapshotStore::new()),
        OrchestratorConfig::default(),
        false,
    )
    .await;
    settle().await;
    actor.send("NEXT", json!({}));
    settle().await;
    actor.send("NEXT", json!({}));
    settle().await;
    assert_eq!(actor.get_snapshot().await.unwrap().state.active_node, "c");

    actor.send("BACK", json!({}));
    settle().await;
    assert_eq!(actor.get_snapshot().await.unwrap().state.active_node, "b");

    actor.send("BACK", json!({}));
    settle().await;
    assert_eq!(actor.get_snapshot().await.unwrap().state.active_node, "a");

    // Third BACK: "a"'s own history entry never set allow_back, so this is a no-op.
    actor.send("BACK", json!({}));
    settle().await;
    assert_eq!(actor.get_snapshot().await.unwrap().state.active_node, "a");
}
