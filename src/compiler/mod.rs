//! Flow compiler (§4.G): parse → normalize → validate → emit.
//!
//! Turns a [`FlowDocument`] into a [`CompiledFlow`] — a normalized,
//! in-memory machine node tree with every legacy shorthand rewritten and
//! every static invariant checked. Compilation is deterministic and
//! idempotent: compiling the same document twice yields structurally
//! identical trees.

mod normalize;
mod validate;

use std::collections::BTreeMap;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::action::ActionSpec;
use crate::transition::TransitionSpec;

pub use validate::CompileError;

/// The flow document as authored (§3). Deserialized directly from JSON;
/// unknown top-level keys are rejected by `#[serde(deny_unknown_fields)]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowDocument {
    pub id: String,
    pub initial: String,
    #[serde(default)]
    pub context: Value,
    pub states: BTreeMap<String, RawStateNode>,
    #[serde(default)]
    pub actions: FxHashMap<String, ActionSpec>,
    /// Top-level error routing (§9 Open Question 2): a single `errorStep`
    /// and/or `sessionExpired` target, modeled as `error_states`.
    #[serde(default)]
    pub error_states: ErrorStates,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStates {
    pub fatal: Option<String>,
    pub session_expired: Option<String>,
}

/// Backwards-compatible shim: `navigation.next` ≡ `on.NEXT.target` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationShim {
    pub next: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Atomic,
    Compound,
    Final,
}

impl Default for NodeType {
    fn default() -> Self {
        NodeType::Atomic
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindSpec {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub assign_to: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleHooks {
    #[serde(default)]
    pub pre: Vec<ActionSpec>,
    #[serde(default)]
    pub post: Vec<ActionSpec>,
    #[serde(default)]
    pub pre_navigate: Vec<ActionSpec>,
    #[serde(default)]
    pub post_navigate: Vec<ActionSpec>,
}

/// A State Node exactly as authored, legacy shorthands and all (§3). This is
/// the *input* shape; [`normalize`] rewrites it into [`MachineNode`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStateNode {
    #[serde(default, rename = "type")]
    pub kind: NodeType,
    #[serde(default)]
    pub view: Option<ViewSpec>,
    #[serde(default)]
    pub bind: Vec<BindSpec>,
    #[serde(default)]
    pub invoke: Vec<InvokeSpec>,
    #[serde(default)]
    pub before_next: Vec<ActionSpec>,
    #[serde(default)]
    pub lifecycle: LifecycleHooks,
    #[serde(default)]
    pub on: FxHashMap<String, RawTransition>,
    /// Legacy shorthand for `on.NEXT.target` (§4.G step 2, §6).
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub navigation: Option<NavigationShim>,
    #[serde(default)]
    pub allow_back: bool,
    #[serde(default)]
    pub states: BTreeMap<String, RawStateNode>,
    #[serde(default)]
    pub initial: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewSpec {
    pub module_id: String,
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
}

/// A Transition Spec as authored: either a bare target string, a
/// `{target, actions?}` object, or the legacy string `if` bridge inside a
/// condition (rewritten away during normalization).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTransition {
    Target(String),
    Full {
        target: RawTarget,
        #[serde(default)]
        actions: Vec<ActionSpec>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTarget {
    Static(String),
    Dynamic {
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        conditions: Vec<RawCondition>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCondition {
    #[serde(rename = "if")]
    pub condition: Value,
    pub to: String,
    #[serde(default)]
    pub effects: Vec<ActionSpec>,
}

/// The normalized, validated machine node tree the runtime actually drives.
/// Node ids are dotted paths (`"a.b"`), matching `activeNode`'s grammar.
#[derive(Debug, Clone)]
pub struct MachineNode {
    pub id: String,
    pub kind: NodeType,
    pub view: Option<ViewSpec>,
    pub bind: Vec<BindSpec>,
    pub invoke: Vec<InvokeSpec>,
    pub before_next: Vec<ActionSpec>,
    pub lifecycle: LifecycleHooks,
    pub on: FxHashMap<String, TransitionSpec>,
    pub allow_back: bool,
    pub children: Vec<String>,
    pub initial_child: Option<String>,
}

/// The emitted artifact of compilation: a flat map of dotted node id →
/// [`MachineNode`], plus the resolved global action registry. Opaque to
/// callers beyond lookup — no source file is re-derived from it.
#[derive(Debug, Clone)]
pub struct CompiledFlow {
    pub id: String,
    pub initial: String,
    pub context: Value,
    pub nodes: FxHashMap<String, MachineNode>,
    pub actions: FxHashMap<String, ActionSpec>,
    pub error_states: ErrorStates,
    pub allow_legacy_string_conditions: bool,
}

impl CompiledFlow {
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&MachineNode> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn is_descendant(&self, ancestor: &str, candidate: &str) -> bool {
        candidate == ancestor || candidate.starts_with(&format!("{ancestor}."))
    }
}

/// Compiles `document` into a [`CompiledFlow`], checking `invoke.type`
/// references against `registry` (§4.G step 3).
///
/// # Errors
/// See [`CompileError`] for the full set of static invariants checked at
/// validation time (§4.G step 3).
pub fn compile(
    document: &FlowDocument,
    allow_legacy_string_conditions: bool,
    registry: &crate::registry::CapabilityRegistry,
) -> Result<CompiledFlow, CompileError> {
    let normalized = normalize::normalize(document, allow_legacy_string_conditions)?;
    validate::validate(&normalized, registry)?;
    Ok(normalized)
}

#[derive(Debug, Error, Diagnostic)]
#[error("flow document is not valid JSON: {0}")]
#[diagnostic(code(flowspire::compiler::parse))]
pub struct ParseError(#[from] pub serde_json::Error);

/// Parses `source` as a [`FlowDocument`] (§4.G step 1). Unknown top-level /
/// state-node keys are rejected by `deny_unknown_fields`.
///
/// # Errors
/// [`ParseError`] if `source` is not valid JSON or does not match the flow
/// document schema.
pub fn parse(source: &str) -> Result<FlowDocument, ParseError> {
    Ok(serde_json::from_str(source)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_minimal_two_state_flow() {
        let doc: FlowDocument = serde_json::from_value(serde_json::json!({
            "id": "checkout",
            "initial": "start",
            "context": {},
            "states": {
                "start": {
                    "on": {"NEXT": "done"}
                },
                "done": {
                    "type": "final"
                }
            }
        }))
        .unwrap();
        let registry = crate::registry::CapabilityRegistry::new();
        let compiled = compile(&doc, false, &registry).unwrap();
        assert_eq!(compiled.initial, "start");
        assert!(compiled.node("start").is_some());
        assert!(compiled.node("done").is_some());
    }
}
