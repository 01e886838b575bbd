//! Normalization phase (§4.G step 2): rewrite legacy shorthand into the
//! canonical [`super::MachineNode`] tree. De-sugaring inline actions into
//! stable-id global entries is not needed here — [`ActionSpec`] already
//! carries no implicit identity requirement in this design (see DESIGN.md);
//! what normalization does rewrite is the `next`/`navigation.next` shim and
//! the legacy string `if` bridge.

use rustc_hash::FxHashMap;
use serde_json::json;

use super::validate::CompileError;
use super::{
    CompiledFlow, FlowDocument, MachineNode, RawCondition, RawStateNode, RawTarget, RawTransition,
};
use crate::transition::{Condition, TransitionSpec, TransitionTarget};

pub fn normalize(
    document: &FlowDocument,
    allow_legacy_string_conditions: bool,
) -> Result<CompiledFlow, CompileError> {
    let mut nodes = FxHashMap::default();
    for (name, raw) in &document.states {
        flatten(name, raw, &mut nodes, allow_legacy_string_conditions)?;
    }
    Ok(CompiledFlow {
        id: document.id.clone(),
        initial: document.initial.clone(),
        context: document.context.clone(),
        nodes,
        actions: document.actions.clone(),
        error_states: document.error_states.clone(),
        allow_legacy_string_conditions,
    })
}

fn flatten(
    id: &str,
    raw: &RawStateNode,
    out: &mut FxHashMap<String, MachineNode>,
    allow_legacy_string_conditions: bool,
) -> Result<(), CompileError> {
    let mut on = FxHashMap::default();
    for (event, raw_transition) in &raw.on {
        on.insert(
            event.clone(),
            normalize_transition(raw_transition, allow_legacy_string_conditions)?,
        );
    }

    // Legacy shim: `next`/`navigation.next` ≡ `on.NEXT.target`, unless the
    // node already declares an explicit `on.NEXT` (explicit wins).
    let legacy_next = raw.next.clone().or_else(|| raw.navigation.as_ref().map(|n| n.next.clone()));
    if let Some(next) = legacy_next {
        on.entry("NEXT".to_string()).or_insert(TransitionSpec {
            target: TransitionTarget::Static(next),
            actions: Vec::new(),
        });
    }

    let children: Vec<String> = raw.states.keys().map(|k| format!("{id}.{k}")).collect();

    out.insert(
        id.to_string(),
        MachineNode {
            id: id.to_string(),
            kind: raw.kind,
            view: raw.view.clone(),
            bind: raw.bind.clone(),
            invoke: raw.invoke.clone(),
            before_next: raw.before_next.clone(),
            lifecycle: raw.lifecycle.clone(),
            on,
            allow_back: raw.allow_back,
            children,
            initial_child: raw.initial.clone(),
        },
    );

    for (child_name, child_raw) in &raw.states {
        let child_id = format!("{id}.{child_name}");
        flatten(&child_id, child_raw, out, allow_legacy_string_conditions)?;
    }
    Ok(())
}

fn normalize_transition(
    raw: &RawTransition,
    allow_legacy_string_conditions: bool,
) -> Result<TransitionSpec, CompileError> {
    match raw {
        RawTransition::Target(target) => Ok(TransitionSpec {
            target: TransitionTarget::Static(target.clone()),
            actions: Vec::new(),
        }),
        RawTransition::Full { target, actions } => Ok(TransitionSpec {
            target: normalize_target(target, allow_legacy_string_conditions)?,
            actions: actions.clone(),
        }),
    }
}

fn normalize_target(
    raw: &RawTarget,
    allow_legacy_string_conditions: bool,
) -> Result<TransitionTarget, CompileError> {
    match raw {
        RawTarget::Static(target) => Ok(TransitionTarget::Static(target.clone())),
        RawTarget::Dynamic { default, conditions } => {
            let conditions = conditions
                .iter()
                .map(|c| normalize_condition(c, allow_legacy_string_conditions))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(TransitionTarget::Dynamic { default: default.clone(), conditions })
        }
    }
}

fn normalize_condition(
    raw: &RawCondition,
    allow_legacy_string_conditions: bool,
) -> Result<Condition, CompileError> {
    let condition = match &raw.condition {
        serde_json::Value::String(template_expr) => {
            if !allow_legacy_string_conditions {
                return Err(CompileError::LegacyStringConditionDisallowed { to: raw.to.clone() });
            }
            // `if: "{{context.path}}"` ↔ `{"==": [{"var": "context.path"}, true]}`.
            let path = template_expr
                .trim()
                .trim_start_matches("{{")
                .trim_end_matches("}}")
                .trim();
            json!({"==": [{"var": path}, true]})
        }
        other => other.clone(),
    };
    Ok(Condition { condition, to: raw.to.clone(), effects: raw.effects.clone() })
}
