//! Transition resolver (§4.F).
//!
//! Given the active node and an event name, resolves `on[event]` into a
//! target node, applying condition effects and transition `actions[]` via
//! the action runner, then records history. `BACK` is handled separately by
//! [`crate::state::RuntimeState::pop_back`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{run_sequence, ActionSpec, PipelineOutcome, RunContext};
use crate::errors::Severity;
use crate::logic;

/// A single `conditions[]` entry: `{if, to, effects?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "if")]
    pub condition: Value,
    pub to: String,
    #[serde(default)]
    pub effects: Vec<ActionSpec>,
}

/// The resolved shape of a Transition Spec target (§3): either a static
/// string, or a `default`/`conditions[]` decision table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionTarget {
    Static(String),
    Dynamic {
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        conditions: Vec<Condition>,
    },
}

/// A full Transition Spec: `{target, actions?}` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub target: TransitionTarget,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

/// Why a transition did not reach a new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Resolution picked `to` and is ready to enter it.
    Resolved,
    /// A condition's `effects[]` aborted at `block`/`fatal` severity.
    Aborted(Severity),
    /// No `conditions[]` matched and the table had no `default` — a compile
    /// bug that should have been caught by the flow compiler (§4.F step 3).
    NoDefault,
    /// Evaluating a condition's `if` tree failed.
    LogicFailed,
}

/// Resolves `spec` against `ctx`, returning the target node name on success.
///
/// Step order per §4.F: normalize already done by the caller (this function
/// takes the already-normalized [`TransitionSpec`]); evaluate `conditions[]`
/// in order, first truthy wins, run its `effects[]`, then select `to`; run
/// the transition's own `actions[]` (post-selection effects) before the
/// caller enters the target; history is recorded by the caller via
/// [`crate::state::RuntimeState::push_history`].
#[tracing::instrument(skip(spec, ctx))]
pub async fn resolve(
    spec: &TransitionSpec,
    ctx: &mut RunContext<'_>,
) -> (TransitionOutcome, Option<String>) {
    let target = match &spec.target {
        TransitionTarget::Static(node) => Some(node.clone()),
        TransitionTarget::Dynamic { default, conditions } => {
            let root = ctx.state.snapshot().data_root(ctx.event, ctx.step);
            let mut chosen = None;
            for condition in conditions {
                match logic::evaluate(&condition.condition, &root) {
                    Ok(value) if is_truthy(&value) => {
                        if !condition.effects.is_empty() {
                            match run_sequence(&condition.effects, ctx).await {
                                PipelineOutcome::Completed => {}
                                PipelineOutcome::Aborted(severity) => {
                                    return (TransitionOutcome::Aborted(severity), None);
                                }
                            }
                        }
                        chosen = Some(condition.to.clone());
                        break;
                    }
                    Ok(_) => continue,
                    Err(_) => return (TransitionOutcome::LogicFailed, None),
                }
            }
            chosen.or_else(|| default.clone())
        }
    };

    let Some(target) = target else {
        return (TransitionOutcome::NoDefault, None);
    };

    if !spec.actions.is_empty() {
        match run_sequence(&spec.actions, ctx).await {
            PipelineOutcome::Completed => {}
            PipelineOutcome::Aborted(severity) => {
                return (TransitionOutcome::Aborted(severity), None);
            }
        }
    }

    (TransitionOutcome::Resolved, Some(target))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_none_or(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::errors::SeverityPolicy;
    use crate::registry::CapabilityRegistry;
    use crate::state::RuntimeState;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn static_target_resolves_directly() {
        let mut state = RuntimeState::fresh("a", json!({}));
        let event = json!({});
        let registry = CapabilityRegistry::new();
        let cache = Cache::new();
        let cancel = CancellationToken::new();
        let mut deferred = Vec::new();
        let named = rustc_hash::FxHashMap::default();
        let policy = SeverityPolicy::default();
        let mut ctx = RunContext {
            state: &mut state,
            event: &event,
            step: 0,
            registry: &registry,
            cache: &cache,
            cancel: &cancel,
            deferred_events: &mut deferred,
            named_actions: &named,
            severity_policy: &policy,
        };
        let spec = TransitionSpec { target: TransitionTarget::Static("b".to_string()), actions: vec![] };
        let (outcome, target) = resolve(&spec, &mut ctx).await;
        assert_eq!(outcome, TransitionOutcome::Resolved);
        assert_eq!(target, Some("b".to_string()));
    }

    #[tokio::test]
    async fn first_truthy_condition_wins() {
        let mut state = RuntimeState::fresh("a", json!({"score": 90}));
        let event = json!({});
        let registry = CapabilityRegistry::new();
        let cache = Cache::new();
        let cancel = CancellationToken::new();
        let mut deferred = Vec::new();
        let named = rustc_hash::FxHashMap::default();
        let policy = SeverityPolicy::default();
        let mut ctx = RunContext {
            state: &mut state,
            event: &event,
            step: 0,
            registry: &registry,
            cache: &cache,
            cancel: &cancel,
            deferred_events: &mut deferred,
            named_actions: &named,
            severity_policy: &policy,
        };
        let spec = TransitionSpec {
            target: TransitionTarget::Dynamic {
                default: Some("fallback".to_string()),
                conditions: vec![
                    Condition {
                        condition: json!({">=": [{"var": "context.score"}, 50]}),
                        to: "pass".to_string(),
                        effects: vec![],
                    },
                    Condition {
                        condition: json!(true),
                        to: "never-reached".to_string(),
                        effects: vec![],
                    },
                ],
            },
            actions: vec![],
        };
        let (outcome, target) = resolve(&spec, &mut ctx).await;
        assert_eq!(outcome, TransitionOutcome::Resolved);
        assert_eq!(target, Some("pass".to_string()));
    }

    #[tokio::test]
    async fn missing_match_falls_back_to_default() {
        let mut state = RuntimeState::fresh("a", json!({"score": 1}));
        let event = json!({});
        let registry = CapabilityRegistry::new();
        let cache = Cache::new();
        let cancel = CancellationToken::new();
        let mut deferred = Vec::new();
        let named = rustc_hash::FxHashMap::default();
        let policy = SeverityPolicy::default();
        let mut ctx = RunContext {
            state: &mut state,
            event: &event,
            step: 0,
            registry: &registry,
            cache: &cache,
            cancel: &cancel,
            deferred_events: &mut deferred,
            named_actions: &named,
            severity_policy: &policy,
        };
        let spec = TransitionSpec {
            target: TransitionTarget::Dynamic {
                default: Some("fallback".to_string()),
                conditions: vec![Condition {
                    condition: json!({">=": [{"var": "context.score"}, 50]}),
                    to: "pass".to_string(),
                    effects: vec![],
                }],
            },
            actions: vec![],
        };
        let (outcome, target) = resolve(&spec, &mut ctx).await;
        assert_eq!(outcome, TransitionOutcome::Resolved);
        assert_eq!(target, Some("fallback".to_string()));
    }
}
