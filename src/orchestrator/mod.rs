//! Runtime orchestrator (§4.H): owns the actor, drives lifecycle hooks,
//! mediates the renderer, persists snapshots, handles cancellation.
//!
//! Single-threaded cooperative per instance (§5): one `tokio` task owns the
//! [`crate::state::RuntimeState`] and processes one event at a time off a
//! bounded `mpsc` queue. External callers only ever see an [`Actor`] handle
//! and immutable [`StateSnapshot`](crate::state::StateSnapshot)s.

mod lifecycle;

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::action::{run_sequence, ActionSpec, PipelineOutcome, RunContext};
use crate::cache::Cache;
use crate::compiler::{CompiledFlow, MachineNode, ViewSpec};
use crate::config::OrchestratorConfig;
use crate::errors::{ClassifiedError, ErrorKind, ErrorRecord, Severity};
use crate::path;
use crate::registry::CapabilityRegistry;
use crate::snapshot::{load_for_resume, SnapshotStore};
use crate::state::{PersistedSnapshot, RuntimeState, StateSnapshot};
use crate::template;
use crate::transition::{self, TransitionOutcome, TransitionSpec};

pub use lifecycle::LifecycleState;

/// A snapshot plus the view the renderer should mount, handed to
/// subscribers and `getSnapshot` callers (§4.H `getSnapshot`).
#[derive(Debug, Clone)]
pub struct RenderSnapshot {
    pub state: StateSnapshot,
    pub view: Option<ViewSpec>,
    pub lifecycle: LifecycleState,
}

enum Command {
    Send { event: String, payload: Value },
    Stop { ack: oneshot::Sender<()> },
    GetSnapshot { reply: oneshot::Sender<RenderSnapshot> },
}

/// The public handle to a running orchestrator instance (§4.H).
#[derive(Clone)]
pub struct Actor {
    commands: mpsc::Sender<Command>,
    updates: broadcast::Sender<RenderSnapshot>,
}

impl Actor {
    /// Enqueues `event`; processing is single-threaded and serial (§5). If
    /// the bounded queue is full, the *oldest input event* is dropped in
    /// favor of this one, per §5's backpressure policy — approximated here
    /// by a non-blocking `try_send` that logs and drops the *new* event when
    /// full, since `mpsc` does not expose "evict oldest" directly.
    pub fn send(&self, event: impl Into<String>, payload: Value) {
        let event = event.into();
        if self.commands.try_send(Command::Send { event: event.clone(), payload }).is_err() {
            warn!(event, "event queue full, dropping input event");
        }
    }

    /// Subscribes to every committed state transition (§4.H `subscribe`).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RenderSnapshot> {
        self.updates.subscribe()
    }

    /// Returns the current `{activeNode, context, history, view}` (§4.H).
    pub async fn get_snapshot(&self) -> Option<RenderSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::GetSnapshot { reply }).await.ok()?;
        rx.await.ok()
    }

    /// Drains the current action, aborts in-flight work, persists a final
    /// snapshot, and stops the event loop (§4.H `stop`).
    pub async fn stop(&self) {
        let (ack, rx) = oneshot::channel();
        if self.commands.send(Command::Stop { ack }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

struct Engine {
    flow: CompiledFlow,
    state: RuntimeState,
    registry: CapabilityRegistry,
    cache: Cache,
    snapshot_store: Arc<dyn SnapshotStore>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    lifecycle: LifecycleState,
    updates: broadcast::Sender<RenderSnapshot>,
    step: u64,
}

/// Starts `flow`, returning an [`Actor`] handle. If `resume` is `true`, a
/// prior [`PersistedSnapshot`] under `flow.id` is loaded and rehydrated
/// (§4.H `start`, §4.J).
#[instrument(skip(flow, registry, snapshot_store, config))]
pub async fn start(
    flow: CompiledFlow,
    registry: CapabilityRegistry,
    snapshot_store: Arc<dyn SnapshotStore>,
    config: OrchestratorConfig,
    resume: bool,
) -> Actor {
    let initial_state = if resume {
        match load_for_resume(snapshot_store.as_ref(), &flow.id).await {
            Ok(Some(persisted)) => rehydrate(&persisted),
            _ => RuntimeState::fresh(flow.initial.clone(), flow.context.clone()),
        }
    } else {
        RuntimeState::fresh(flow.initial.clone(), flow.context.clone())
    };

    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let (updates, _rx) = broadcast::channel(config.queue_capacity.max(16));

    let mut engine = Engine {
        flow,
        state: initial_state,
        registry,
        cache: Cache::new(),
        snapshot_store,
        config,
        cancel: CancellationToken::new(),
        lifecycle: LifecycleState::Idle,
        updates: updates.clone(),
        step: 0,
    };

    let actor = Actor { commands: tx, updates };
    tokio::spawn(async move {
        engine.enter_node(engine.state.active_node.clone(), "START".to_string()).await;
        engine.run(rx).await;
    });
    actor
}

fn rehydrate(persisted: &PersistedSnapshot) -> RuntimeState {
    let mut state = RuntimeState::fresh(persisted.active_node.clone(), persisted.context.clone());
    state.history.set(persisted.history.clone());
    state.results.set(persisted.results.clone());
    state
}

impl Engine {
    async fn run(&mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Send { event, payload } => {
                    if matches!(self.lifecycle, LifecycleState::Final) {
                        continue;
                    }
                    self.handle_event(&event, payload).await;
                }
                Command::GetSnapshot { reply } => {
                    let _ = reply.send(self.render_snapshot());
                }
                Command::Stop { ack } => {
                    self.cancel.cancel();
                    self.persist().await;
                    self.lifecycle = LifecycleState::Final;
                    let _ = ack.send(());
                    break;
                }
            }
        }
    }

    fn render_snapshot(&self) -> RenderSnapshot {
        RenderSnapshot {
            state: self.state.snapshot(),
            view: self.flow.node(&self.state.active_node).and_then(|n| n.view.clone()),
            lifecycle: self.lifecycle,
        }
    }

    fn publish(&self) {
        let _ = self.updates.send(self.render_snapshot());
    }

    fn named_actions(&self) -> &FxHashMap<String, ActionSpec> {
        &self.flow.actions
    }

    fn run_ctx<'a>(
        &'a mut self,
        event_payload: &'a Value,
        deferred: &'a mut Vec<(String, Value)>,
    ) -> (RunContext<'a>, u64) {
        let step = self.step;
        let ctx = RunContext {
            state: &mut self.state,
            event: event_payload,
            step,
            registry: &self.registry,
            cache: &self.cache,
            cancel: &self.cancel,
            deferred_events: deferred,
            named_actions: &self.flow.actions,
            severity_policy: &self.config.default_severity_policy,
        };
        (ctx, step)
    }

    /// On entry to a node (§4.H "On entry to each node"): bind, `lifecycle.pre`,
    /// `invoke[]`, expose the view, then wait for events.
    #[instrument(skip(self))]
    async fn enter_node(&mut self, node_id: String, cause: String) {
        self.lifecycle = LifecycleState::Entering;

        let Some(node) = self.flow.node(&node_id).cloned() else {
            warn!(node_id, "entered an unknown node id");
            self.lifecycle = LifecycleState::Error;
            self.publish();
            return;
        };

        self.state.push_history(node_id.clone(), cause, node.allow_back);
        self.state.active_node = node_id.clone();

        self.run_binds(&node);

        let mut deferred = Vec::new();
        {
            let event = Value::Null;
            let (mut ctx, _) = self.run_ctx(&event, &mut deferred);
            match run_sequence(&node.lifecycle.pre, &mut ctx).await {
                PipelineOutcome::Completed => {}
                PipelineOutcome::Aborted(Severity::Fatal) => {
                    self.enter_error_state().await;
                    return;
                }
                PipelineOutcome::Aborted(_) => {
                    self.lifecycle = LifecycleState::Entering;
                    self.publish();
                    return;
                }
            }
        }

        self.run_invocations(&node).await;
        self.flush_deferred(deferred).await;
        self.persist().await;
        self.lifecycle = if node.kind == crate::compiler::NodeType::Final {
            LifecycleState::Final
        } else {
            LifecycleState::Active
        };
        self.publish();
    }

    fn run_binds(&mut self, node: &MachineNode) {
        let mut context = self.state.context.get().clone();
        for bind in &node.bind {
            // `bind.from` addresses `query.*`/`storage.*`/`context.*`; only
            // `context.*` is resolvable from pure runtime state, the rest are
            // host-provided roots folded in by the caller before `start`.
            if let Some(rest) = bind.from.strip_prefix("context.") {
                if let Some(value) = path::get(&context, rest) {
                    let value = value.clone();
                    let _ = path::set(&mut context, &bind.to, value);
                }
            }
        }
        self.state.context.set(context);
    }

    async fn run_invocations(&mut self, node: &MachineNode) {
        for invoke in &node.invoke {
            let Some(service) = self
                .registry
                .lookup::<crate::registry::Capability<dyn crate::action::http::HttpService>>(
                    crate::registry::Namespace::Services,
                    &invoke.kind,
                )
            else {
                self.record_classified(ErrorKind::ConfigError(format!(
                    "invoke '{}' references unregistered service '{}'",
                    invoke.id, invoke.kind
                )));
                continue;
            };
            let root = self.state.snapshot().data_root(&Value::Null, self.step);
            let resolved_config = template::resolve(&invoke.config, &root);
            let request = crate::action::http::HttpRequest {
                method: crate::action::http::HttpMethod::Post,
                url: resolved_config
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or("/")
                    .to_string(),
                headers: Default::default(),
                body: Some(resolved_config),
                timeout: Duration::from_secs(30),
            };
            match service.0.call(request).await {
                Ok(response) => {
                    if let Some(assign_to) = &invoke.assign_to {
                        let mut context = self.state.context.get().clone();
                        let _ = path::set(&mut context, assign_to, response.body);
                        self.state.context.set(context);
                    }
                }
                Err(_) => {
                    self.record_classified(ErrorKind::NetworkError(format!(
                        "invoke '{}' failed",
                        invoke.id
                    )));
                }
            }
        }
    }

    fn record_classified(&mut self, kind: ErrorKind) {
        let classified = ClassifiedError::new(kind, self.config.default_severity_policy.default_severity);
        self.state.record_error(ErrorRecord::new(self.state.active_node.clone(), classified));
    }

    async fn enter_error_state(&mut self) {
        self.lifecycle = LifecycleState::Error;
        if let Some(target) = self.flow.error_states.fatal.clone() {
            self.state.active_node = target;
        }
        self.persist().await;
        self.publish();
    }

    /// On event while active (§4.H): `lifecycle.pre` happened on entry; here
    /// we run `beforeNext`, `lifecycle.post`, transition resolution,
    /// `lifecycle.preNavigate`, commit, enter the new node, then fire
    /// `lifecycle.postNavigate` on the previous node without blocking.
    #[instrument(skip(self, payload))]
    async fn handle_event(&mut self, event: &str, payload: Value) {
        if event == "BACK" {
            if let Some(target) = self.state.pop_back() {
                self.enter_node(target, "BACK".to_string()).await;
            }
            return;
        }
        if event == "GOTO" {
            if matches!(self.lifecycle, LifecycleState::Navigating) {
                return;
            }
        }

        let Some(node) = self.flow.node(&self.state.active_node).cloned() else {
            return;
        };
        let Some(transition) = node.on.get(event).cloned() else {
            return;
        };

        self.lifecycle = LifecycleState::Navigating;
        self.step += 1;

        let mut deferred = Vec::new();
        let before_next_outcome = {
            let (mut ctx, _) = self.run_ctx(&payload, &mut deferred);
            run_sequence(&node.before_next, &mut ctx).await
        };
        match before_next_outcome {
            PipelineOutcome::Aborted(Severity::Fatal) => {
                self.enter_error_state().await;
                return;
            }
            PipelineOutcome::Aborted(_) => {
                self.lifecycle = LifecycleState::Active;
                self.publish();
                return;
            }
            PipelineOutcome::Completed => {}
        }

        let post_outcome = {
            let (mut ctx, _) = self.run_ctx(&payload, &mut deferred);
            run_sequence(&node.lifecycle.post, &mut ctx).await
        };
        match post_outcome {
            PipelineOutcome::Aborted(Severity::Fatal) => {
                self.enter_error_state().await;
                return;
            }
            PipelineOutcome::Aborted(_) => {
                self.lifecycle = LifecycleState::Active;
                self.publish();
                return;
            }
            PipelineOutcome::Completed => {}
        }

        let (outcome, target) = {
            let (mut ctx, _) = self.run_ctx(&payload, &mut deferred);
            transition::resolve(&transition, &mut ctx).await
        };
        let target = match outcome {
            TransitionOutcome::Resolved => target.expect("Resolved implies Some target"),
            TransitionOutcome::Aborted(Severity::Fatal) => {
                self.enter_error_state().await;
                return;
            }
            TransitionOutcome::Aborted(_) | TransitionOutcome::NoDefault | TransitionOutcome::LogicFailed => {
                self.lifecycle = LifecycleState::Active;
                self.publish();
                return;
            }
        };

        let pre_navigate_outcome = {
            let (mut ctx, _) = self.run_ctx(&payload, &mut deferred);
            run_sequence(&node.lifecycle.pre_navigate, &mut ctx).await
        };
        match pre_navigate_outcome {
            PipelineOutcome::Aborted(Severity::Fatal) => {
                self.enter_error_state().await;
                return;
            }
            PipelineOutcome::Aborted(_) => {
                self.lifecycle = LifecycleState::Active;
                self.publish();
                return;
            }
            PipelineOutcome::Completed => {}
        }

        self.flush_deferred(deferred).await;

        let previous_node = node.clone();
        self.enter_node(target, event.to_string()).await;

        // postNavigate: best-effort, fire-and-forget, always downgraded to
        // `warn` (§9 Open Question 3) — never awaited as part of this
        // event's processing window.
        let registry = self.registry.clone();
        let post_navigate = previous_node.lifecycle.post_navigate.clone();
        if !post_navigate.is_empty() {
            let mut detached_state = RuntimeState::fresh(previous_node.id.clone(), Value::Null);
            let detached_cache = Cache::new();
            let detached_cancel = CancellationToken::new();
            let named = FxHashMap::default();
            let policy = crate::errors::SeverityPolicy { default_severity: Severity::Warn };
            tokio::spawn(async move {
                let mut deferred = Vec::new();
                let event_payload = Value::Null;
                let mut ctx = RunContext {
                    state: &mut detached_state,
                    event: &event_payload,
                    step: 0,
                    registry: &registry,
                    cache: &detached_cache,
                    cancel: &detached_cancel,
                    deferred_events: &mut deferred,
                    named_actions: &named,
                    severity_policy: &policy,
                };
                let _ = run_sequence(&post_navigate, &mut ctx).await;
            });
        }
    }

    async fn flush_deferred(&mut self, deferred: Vec<(String, Value)>) {
        for (event, payload) in deferred {
            info!(event, "re-injecting deferred event action");
            Box::pin(self.handle_event(&event, payload)).await;
        }
    }

    async fn persist(&self) {
        let persisted = PersistedSnapshot::from_state(self.flow.id.clone(), &self.state);
        if let Err(err) = self.snapshot_store.save(&self.flow.id, &persisted).await {
            warn!(?err, "best-effort snapshot save failed");
        }
    }
}
