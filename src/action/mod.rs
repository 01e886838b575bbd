//! Action runner (§4.E).
//!
//! Executes an ordered list of [`ActionSpec`] against a [`RunContext`].
//! Sequential by default; `parallel` children run concurrently and are all
//! awaited, the group failing if any child exceeds its own severity
//! threshold. All actions observe `cancel` — a cooperative cancellation
//! token checked between actions and threaded into suspension points.

pub mod http;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::cache::Cache;
use crate::errors::{ClassifiedError, ErrorKind, ErrorRecord, Severity, SeverityPolicy};
use crate::path;
use crate::registry::CapabilityRegistry;
use crate::state::RuntimeState;
use crate::template;

pub use http::{HttpActionSpec, HttpService};

/// A single entry in an Action Spec list, discriminated on `type` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionSpec {
    Assign {
        to: String,
        #[serde(default)]
        from_event_path: Option<String>,
        #[serde(default)]
        value: Option<Value>,
    },
    Clear {
        paths: Vec<String>,
    },
    Track {
        event: String,
        #[serde(default)]
        props: Value,
    },
    Http(HttpActionSpec),
    Delay {
        duration_ms: u64,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
    Use {
        #[serde(rename = "use")]
        name: String,
    },
    Parallel {
        parallel: Vec<ActionSpec>,
    },
}

/// Everything an action needs to run, threaded through the pipeline (§4.E).
pub struct RunContext<'a> {
    pub state: &'a mut RuntimeState,
    pub event: &'a Value,
    pub step: u64,
    pub registry: &'a CapabilityRegistry,
    pub cache: &'a Cache,
    pub cancel: &'a CancellationToken,
    /// Events queued by `event`-type actions, re-injected by the orchestrator
    /// once the current pipeline finishes (§4.E).
    pub deferred_events: &'a mut Vec<(String, Value)>,
    /// Reusable action specs from the flow document's top-level `actions`
    /// registry, resolved by `use` (§3).
    pub named_actions: &'a rustc_hash::FxHashMap<String, ActionSpec>,
    pub severity_policy: &'a SeverityPolicy,
}

impl RunContext<'_> {
    fn data_root(&self) -> Value {
        self.state.snapshot().data_root(self.event, self.step)
    }
}

/// The outcome of running a pipeline: either it ran to completion (possibly
/// with `warn`-severity errors recorded along the way), or it was aborted at
/// `block`/`fatal` severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Aborted(Severity),
}

/// Runs `actions` in order against `ctx`, stopping early on `block`/`fatal`.
#[instrument(skip(actions, ctx))]
pub async fn run_sequence(actions: &[ActionSpec], ctx: &mut RunContext<'_>) -> PipelineOutcome {
    for action in actions {
        if ctx.cancel.is_cancelled() {
            record_cancelled(ctx);
            return PipelineOutcome::Aborted(Severity::Block);
        }
        match run_one(action, ctx).await {
            PipelineOutcome::Completed => continue,
            aborted => return aborted,
        }
    }
    PipelineOutcome::Completed
}

fn record_cancelled(ctx: &mut RunContext<'_>) {
    let classified = ClassifiedError::new(ErrorKind::Cancelled, Severity::Block);
    ctx.state
        .record_error(ErrorRecord::new(ctx.state.active_node.clone(), classified));
}

#[allow(clippy::too_many_lines)]
async fn run_one(action: &ActionSpec, ctx: &mut RunContext<'_>) -> PipelineOutcome {
    match action {
        ActionSpec::Assign { to, from_event_path, value } => {
            run_assign(to, from_event_path.as_deref(), value.as_ref(), ctx);
            PipelineOutcome::Completed
        }
        ActionSpec::Clear { paths } => {
            let mut context = ctx.state.context.get().clone();
            for p in paths {
                path::unset(&mut context, p);
            }
            ctx.state.context.set(context);
            PipelineOutcome::Completed
        }
        ActionSpec::Track { event, props } => {
            if let Some(tracker) = ctx
                .registry
                .lookup::<crate::registry::Capability<dyn TrackService>>(crate::registry::Namespace::Actions, "track")
            {
                tracker.0.track(event, props);
            } else {
                warn!(event, "no 'track' capability registered, dropping track action");
            }
            PipelineOutcome::Completed
        }
        ActionSpec::Http(spec) => http::run_http_action(spec, ctx).await,
        ActionSpec::Delay { duration_ms } => {
            run_delay(*duration_ms, ctx).await;
            PipelineOutcome::Completed
        }
        ActionSpec::Event { event, payload } => {
            let root = ctx.data_root();
            let resolved_payload = template::resolve(payload, &root);
            ctx.deferred_events.push((event.clone(), resolved_payload));
            PipelineOutcome::Completed
        }
        ActionSpec::Use { name } => {
            let Some(resolved) = ctx.named_actions.get(name).cloned() else {
                warn!(name, "'use' reference did not resolve at runtime");
                return PipelineOutcome::Completed;
            };
            Box::pin(run_one(&resolved, ctx)).await
        }
        ActionSpec::Parallel { parallel } => run_parallel(parallel, ctx).await,
    }
}

fn run_assign(to: &str, from_event_path: Option<&str>, value: Option<&Value>, ctx: &mut RunContext<'_>) {
    let resolved = if let Some(event_path) = from_event_path {
        path::get(ctx.event, event_path).cloned().unwrap_or(Value::Null)
    } else {
        let root = ctx.data_root();
        value.map_or(Value::Null, |v| template::resolve(v, &root))
    };
    let mut context = ctx.state.context.get().clone();
    let _ = path::set(&mut context, to, resolved);
    ctx.state.context.set(context);
}

async fn run_delay(duration_ms: u64, ctx: &mut RunContext<'_>) {
    tokio::select! {
        () = tokio::time::sleep(Duration::from_millis(duration_ms)) => {}
        () = ctx.cancel.cancelled() => {
            record_cancelled(ctx);
        }
    }
}

/// Runs each child of a `parallel` block, awaiting all of them before
/// returning. A mutable `RunContext` cannot be shared across concurrently
/// polled futures, so true OS-level overlap is not attempted here; children
/// are driven one after another without requiring a prior child to reach a
/// transition-worthy outcome before the next starts its own suspension
/// points, which matches §5's single-threaded cooperative model (`parallel`
/// still belongs to one event's processing window).
async fn run_parallel(children: &[ActionSpec], ctx: &mut RunContext<'_>) -> PipelineOutcome {
    let mut worst: Option<Severity> = None;
    for child in children {
        match Box::pin(run_one(child, ctx)).await {
            PipelineOutcome::Completed => {}
            PipelineOutcome::Aborted(severity) => {
                worst = Some(match worst {
                    Some(current) if current_outranks(current, severity) => current,
                    _ => severity,
                });
            }
        }
    }
    match worst {
        Some(severity) => PipelineOutcome::Aborted(severity),
        None => PipelineOutcome::Completed,
    }
}

fn current_outranks(current: Severity, candidate: Severity) -> bool {
    rank(current) >= rank(candidate)
}

fn rank(s: Severity) -> u8 {
    match s {
        Severity::Warn => 0,
        Severity::Block => 1,
        Severity::Fatal => 2,
    }
}

/// The `actions.track(event, props)` capability from §6: fire-and-forget,
/// must not throw.
pub trait TrackService: Send + Sync {
    fn track(&self, event: &str, props: &Value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SeverityPolicy;
    use serde_json::json;

    fn test_ctx<'a>(
        state: &'a mut RuntimeState,
        event: &'a Value,
        registry: &'a CapabilityRegistry,
        cache: &'a Cache,
        cancel: &'a CancellationToken,
        deferred_events: &'a mut Vec<(String, Value)>,
        named_actions: &'a rustc_hash::FxHashMap<String, ActionSpec>,
        policy: &'a SeverityPolicy,
    ) -> RunContext<'a> {
        RunContext {
            state,
            event,
            step: 0,
            registry,
            cache,
            cancel,
            deferred_events,
            named_actions,
            severity_policy: policy,
        }
    }

    #[tokio::test]
    async fn assign_from_literal_value_writes_context() {
        let mut state = RuntimeState::fresh("a", json!({}));
        let event = json!({});
        let registry = CapabilityRegistry::new();
        let cache = Cache::new();
        let cancel = CancellationToken::new();
        let mut deferred = Vec::new();
        let named = rustc_hash::FxHashMap::default();
        let policy = SeverityPolicy::default();
        let mut ctx = test_ctx(&mut state, &event, &registry, &cache, &cancel, &mut deferred, &named, &policy);
        let outcome = run_sequence(
            &[ActionSpec::Assign {
                to: "x".to_string(),
                from_event_path: None,
                value: Some(json!(42)),
            }],
            &mut ctx,
        )
        .await;
        assert_eq!(outcome, PipelineOutcome::Completed);
        assert_eq!(path::get(state.context.get(), "x"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn clear_removes_listed_paths() {
        let mut state = RuntimeState::fresh("a", json!({"x": 1, "y": 2}));
        let event = json!({});
        let registry = CapabilityRegistry::new();
        let cache = Cache::new();
        let cancel = CancellationToken::new();
        let mut deferred = Vec::new();
        let named = rustc_hash::FxHashMap::default();
        let policy = SeverityPolicy::default();
        let mut ctx = test_ctx(&mut state, &event, &registry, &cache, &cancel, &mut deferred, &named, &policy);
        run_sequence(&[ActionSpec::Clear { paths: vec!["x".to_string()] }], &mut ctx).await;
        assert_eq!(path::get(state.context.get(), "x"), None);
        assert_eq!(path::get(state.context.get(), "y"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn event_action_defers_reinjection_until_pipeline_finishes() {
        let mut state = RuntimeState::fresh("a", json!({}));
        let event = json!({});
        let registry = CapabilityRegistry::new();
        let cache = Cache::new();
        let cancel = CancellationToken::new();
        let mut deferred = Vec::new();
        let named = rustc_hash::FxHashMap::default();
        let policy = SeverityPolicy::default();
        let mut ctx = test_ctx(&mut state, &event, &registry, &cache, &cancel, &mut deferred, &named, &policy);
        run_sequence(
            &[ActionSpec::Event { event: "NEXT".to_string(), payload: json!({"k": 1}) }],
            &mut ctx,
        )
        .await;
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].0, "NEXT");
    }

    #[tokio::test]
    async fn cancellation_aborts_remaining_actions() {
        let mut state = RuntimeState::fresh("a", json!({}));
        let event = json!({});
        let registry = CapabilityRegistry::new();
        let cache = Cache::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut deferred = Vec::new();
        let named = rustc_hash::FxHashMap::default();
        let policy = SeverityPolicy::default();
        let mut ctx = test_ctx(&mut state, &event, &registry, &cache, &cancel, &mut deferred, &named, &policy);
        let outcome = run_sequence(
            &[ActionSpec::Assign { to: "x".to_string(), from_event_path: None, value: Some(json!(1)) }],
            &mut ctx,
        )
        .await;
        assert_eq!(outcome, PipelineOutcome::Aborted(Severity::Block));
        assert_eq!(path::get(state.context.get(), "x"), None);
    }
}
