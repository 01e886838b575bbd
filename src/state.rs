//! Machine Runtime State (§3).
//!
//! The orchestrator exclusively owns one [`RuntimeState`] per session;
//! every other component receives either a read-only [`StateSnapshot`] or a
//! scoped write handle (`&mut serde_json::Value` into `context`, in
//! practice). The state is created at `start(flow)`, mutated only through
//! bindings / `invoke` completions / action `assign`-`clear`-`mapResult` /
//! transition `effects`, and destroyed on `stop()`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::channels::{Channel, ContextChannel, ErrorsChannel, HistoryChannel, HistoryEntry, ResultsChannel};
use crate::errors::ErrorRecord;
use crate::path;

/// Schema version embedded in persisted snapshots (§4.J, §6).
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// The live, mutable runtime state for one orchestrator session.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub active_node: String,
    pub context: ContextChannel,
    pub history: HistoryChannel,
    pub results: ResultsChannel,
    pub errors: ErrorsChannel,
    /// In-flight action ids, used for cancellation bookkeeping (§3). Not
    /// versioned and not part of the persisted snapshot — it is
    /// reconstructed empty on resume.
    pub pending: HashSet<String>,
}

impl RuntimeState {
    /// Creates the initial runtime state for a freshly started flow.
    #[must_use]
    pub fn fresh(initial_node: impl Into<String>, initial_context: Value) -> Self {
        let mut state = Self {
            active_node: initial_node.into(),
            context: ContextChannel::new(initial_context, 0),
            history: HistoryChannel::new(Vec::new(), 0),
            results: ResultsChannel::new(json!({}), 0),
            errors: ErrorsChannel::new(Vec::new(), 0),
            pending: HashSet::new(),
        };
        let node = state.active_node.clone();
        state.push_history(node, "INIT", false);
        state
    }

    /// Pushes a history entry, de-duplicating consecutive identical node ids
    /// per §4.F step 5 / §8.
    pub fn push_history(&mut self, node: impl Into<String>, cause: impl Into<String>, allow_back: bool) {
        let node = node.into();
        let is_duplicate = self
            .history
            .get()
            .last()
            .is_some_and(|last| last.node == node);
        if is_duplicate {
            return;
        }
        let mut entries = self.history.get().clone();
        entries.push(HistoryEntry::new(node, cause, allow_back));
        self.history.set(entries);
    }

    /// Pops history while the top entry allows `BACK`, per §4.F. Returns the
    /// node to navigate back to, or `None` if the stack is empty / the top
    /// entry disallows back navigation (both cases: no-op per §8).
    pub fn pop_back(&mut self) -> Option<String> {
        let mut entries = self.history.get().clone();
        let top = entries.last()?;
        if !top.allow_back {
            return None;
        }
        entries.pop();
        let target = entries.last().map(|e| e.node.clone());
        if let Some(target) = &target {
            self.history.set(entries);
            Some(target.clone())
        } else {
            None
        }
    }

    /// The `history` exposed to snapshots/persistence (§4.F step 5, §8):
    /// each entry records a node *after* it's been left, tagged with the
    /// cause that brought the machine to it. The internal channel also
    /// carries the active node's own entry (on top) so `pop_back` can read
    /// its `allow_back` flag; that entry is not yet historical, so it's
    /// excluded here.
    #[must_use]
    pub fn visible_history(&self) -> Vec<HistoryEntry> {
        let entries = self.history.get();
        entries[..entries.len().saturating_sub(1)].to_vec()
    }

    pub fn record_error(&mut self, record: ErrorRecord) {
        let mut errors = self.errors.get().clone();
        errors.push(record);
        self.errors.set(errors);
    }

    /// Stores a `mapResult` value under `results[stepId][actionId]` (§3, §4.E step 6).
    pub fn set_result(&mut self, step_id: &str, action_id: &str, value: Value) {
        let mut results = self.results.get().clone();
        let full_path = format!("{step_id}.{action_id}");
        let _ = path::set(&mut results, &full_path, value);
        self.results.set(results);
    }

    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            active_node: self.active_node.clone(),
            context: self.context.get().clone(),
            history: self.visible_history(),
            results: self.results.get().clone(),
            errors: self.errors.get().clone(),
            context_version: self.context.version(),
            history_version: self.history.version(),
            results_version: self.results.version(),
            errors_version: self.errors.version(),
        }
    }
}

/// An immutable read-only view of [`RuntimeState`], handed out to action
/// execution, template/logic evaluation, and the renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub active_node: String,
    pub context: Value,
    pub history: Vec<HistoryEntry>,
    pub results: Value,
    pub errors: Vec<ErrorRecord>,
    pub context_version: u32,
    pub history_version: u32,
    pub results_version: u32,
    pub errors_version: u32,
}

impl StateSnapshot {
    /// A data root combining `context`, the current event payload, the
    /// current `step`, and `results`, matching the template/logic `root`
    /// described in §4.B/§4.C/§4.E step 1.
    #[must_use]
    pub fn data_root(&self, event: &Value, step: u64) -> Value {
        json!({
            "context": self.context,
            "event": event,
            "step": step,
            "results": self.results,
        })
    }
}

/// The persisted snapshot shape from §4.J / §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub schema_version: u32,
    pub flow_id: String,
    pub active_node: String,
    pub context: Value,
    pub history: Vec<HistoryEntry>,
    pub results: Value,
}

impl PersistedSnapshot {
    #[must_use]
    pub fn from_state(flow_id: impl Into<String>, state: &RuntimeState) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            flow_id: flow_id.into(),
            active_node: state.active_node.clone(),
            context: state.context.get().clone(),
            history: state.visible_history(),
            results: state.results.get().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_seeds_history_with_init_entry() {
        let state = RuntimeState::fresh("a", json!({}));
        assert_eq!(state.history.get().len(), 1);
        assert_eq!(state.history.get()[0].node, "a");
        assert_eq!(state.history.get()[0].cause, "INIT");
    }

    #[test]
    fn push_history_deduplicates_consecutive_nodes() {
        let mut state = RuntimeState::fresh("a", json!({}));
        state.push_history("a", "NEXT", false);
        assert_eq!(state.history.get().len(), 1);
        state.push_history("b", "NEXT", true);
        assert_eq!(state.history.get().len(), 2);
    }

    #[test]
    fn pop_back_respects_allow_back_flag() {
        let mut state = RuntimeState::fresh("a", json!({}));
        state.push_history("b", "NEXT", false);
        // top ("b") disallows back -> no-op
        assert_eq!(state.pop_back(), None);

        let mut state = RuntimeState::fresh("a", json!({}));
        state.push_history("b", "NEXT", true);
        assert_eq!(state.pop_back(), Some("a".to_string()));
        assert_eq!(state.history.get().len(), 1);
    }

    #[test]
    fn pop_back_on_single_entry_history_is_noop() {
        let mut state = RuntimeState::fresh("a", json!({}));
        assert_eq!(state.pop_back(), None);
    }

    #[test]
    fn visible_history_excludes_the_active_nodes_own_entry() {
        let mut state = RuntimeState::fresh("a", json!({}));
        state.push_history("b", "NEXT", false);
        state.push_history("c", "NEXT", false);
        assert_eq!(state.history.get().len(), 3);
        let visible = state.visible_history();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].node, "a");
        assert_eq!(visible[0].cause, "INIT");
        assert_eq!(visible[1].node, "b");
        assert_eq!(visible[1].cause, "NEXT");
    }

    #[test]
    fn set_result_namespaces_under_step_and_action_id() {
        let mut state = RuntimeState::fresh("a", json!({}));
        state.set_result("step1", "verify", json!("OK"));
        assert_eq!(
            path::get(state.results.get(), "step1.verify"),
            Some(&json!("OK"))
        );
    }
}
