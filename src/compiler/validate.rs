//! Validation phase (§4.G step 3): every static invariant the compiler
//! promises the runtime never has to re-check.

use std::collections::HashSet;

use miette::Diagnostic;
use thiserror::Error;

use super::CompiledFlow;
use crate::action::ActionSpec;
use crate::logic;
use crate::registry::{CapabilityRegistry, Namespace};
use crate::transition::{Condition, TransitionTarget};

#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error("transition target '{target}' (from node '{from}', event '{event}') does not exist")]
    #[diagnostic(code(flowspire::compiler::unknown_target))]
    UnknownTarget { from: String, event: String, target: String },

    #[error("'use' reference '{name}' does not resolve against the global actions registry")]
    #[diagnostic(code(flowspire::compiler::unresolved_use))]
    UnresolvedUse { name: String },

    #[error("cycle detected in 'use' chain starting at '{start}'")]
    #[diagnostic(code(flowspire::compiler::use_cycle))]
    UseCycle { start: String },

    #[error("node '{node}' invoke '{invoke_id}' has type '{kind}' which is not a registered service")]
    #[diagnostic(code(flowspire::compiler::unknown_invoke_type))]
    UnknownInvokeType { node: String, invoke_id: String, kind: String },

    #[error("compound node '{node}' declares initial '{initial}' which is not a descendant")]
    #[diagnostic(code(flowspire::compiler::initial_not_descendant))]
    InitialNotDescendant { node: String, initial: String },

    #[error("condition on node '{node}' event '{event}' uses an unknown logic operator: {detail}")]
    #[diagnostic(code(flowspire::compiler::unknown_operator))]
    UnknownOperator { node: String, event: String, detail: String },

    #[error("transition on node '{node}' event '{event}' has conditions but no 'default' target")]
    #[diagnostic(code(flowspire::compiler::missing_default))]
    MissingDefault { node: String, event: String },

    #[error("legacy string 'if' condition used on a transition to '{to}' but allow_legacy_string_conditions is disabled")]
    #[diagnostic(code(flowspire::compiler::legacy_string_condition_disallowed))]
    LegacyStringConditionDisallowed { to: String },
}

pub fn validate(flow: &CompiledFlow, registry: &CapabilityRegistry) -> Result<(), CompileError> {
    validate_transition_targets(flow)?;
    validate_uses(flow)?;
    validate_invoke_types(flow, registry)?;
    validate_initial_descendants(flow)?;
    validate_condition_operators(flow)?;
    Ok(())
}

fn validate_transition_targets(flow: &CompiledFlow) -> Result<(), CompileError> {
    for node in flow.nodes.values() {
        for (event, transition) in &node.on {
            match &transition.target {
                TransitionTarget::Static(target) => check_target_exists(flow, &node.id, event, target)?,
                TransitionTarget::Dynamic { default, conditions } => {
                    if default.is_none() {
                        return Err(CompileError::MissingDefault {
                            node: node.id.clone(),
                            event: event.clone(),
                        });
                    }
                    if let Some(default) = default {
                        check_target_exists(flow, &node.id, event, default)?;
                    }
                    for condition in conditions {
                        check_target_exists(flow, &node.id, event, &condition.to)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_target_exists(flow: &CompiledFlow, from: &str, event: &str, target: &str) -> Result<(), CompileError> {
    if target == "BACK" || flow.nodes.contains_key(target) {
        Ok(())
    } else {
        Err(CompileError::UnknownTarget {
            from: from.to_string(),
            event: event.to_string(),
            target: target.to_string(),
        })
    }
}

/// Every `use` resolves at compile time, and `use` chains (a named action
/// that is itself a `use` of another named action) contain no cycles.
fn validate_uses(flow: &CompiledFlow) -> Result<(), CompileError> {
    for name in flow.actions.keys() {
        let mut visited = HashSet::new();
        walk_use_chain(flow, name, &mut visited)?;
    }
    for node in flow.nodes.values() {
        for actions in all_action_lists(node) {
            for action in actions {
                if let ActionSpec::Use { name } = action {
                    let mut visited = HashSet::new();
                    walk_use_chain(flow, name, &mut visited)?;
                }
            }
        }
    }
    Ok(())
}

fn walk_use_chain(flow: &CompiledFlow, name: &str, visited: &mut HashSet<String>) -> Result<(), CompileError> {
    if !visited.insert(name.to_string()) {
        return Err(CompileError::UseCycle { start: name.to_string() });
    }
    match flow.actions.get(name) {
        Some(ActionSpec::Use { name: next }) => walk_use_chain(flow, next, visited),
        Some(_) => Ok(()),
        None => Err(CompileError::UnresolvedUse { name: name.to_string() }),
    }
}

fn all_action_lists(node: &super::MachineNode) -> Vec<&Vec<ActionSpec>> {
    let mut lists = vec![
        &node.before_next,
        &node.lifecycle.pre,
        &node.lifecycle.post,
        &node.lifecycle.pre_navigate,
        &node.lifecycle.post_navigate,
    ];
    for transition in node.on.values() {
        lists.push(&transition.actions);
    }
    lists
}

fn validate_invoke_types(flow: &CompiledFlow, registry: &CapabilityRegistry) -> Result<(), CompileError> {
    // An empty registry at compile time (e.g. tests, or compiling ahead of
    // capability registration) is treated as "not yet checkable" rather than
    // a hard failure, so only run this check once at least one service is
    // registered.
    if registry.list(Namespace::Services).is_empty() {
        return Ok(());
    }
    for node in flow.nodes.values() {
        for invoke in &node.invoke {
            if !registry.has(Namespace::Services, &invoke.kind) {
                return Err(CompileError::UnknownInvokeType {
                    node: node.id.clone(),
                    invoke_id: invoke.id.clone(),
                    kind: invoke.kind.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_initial_descendants(flow: &CompiledFlow) -> Result<(), CompileError> {
    for node in flow.nodes.values() {
        if node.kind == super::NodeType::Compound {
            if let Some(initial) = &node.initial_child {
                let full = format!("{}.{}", node.id, initial);
                if !flow.nodes.contains_key(&full) {
                    return Err(CompileError::InitialNotDescendant {
                        node: node.id.clone(),
                        initial: initial.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn validate_condition_operators(flow: &CompiledFlow) -> Result<(), CompileError> {
    for node in flow.nodes.values() {
        for (event, transition) in &node.on {
            if let TransitionTarget::Dynamic { conditions, .. } = &transition.target {
                for condition in conditions {
                    check_condition_operators(condition, &node.id, event)?;
                }
            }
        }
    }
    Ok(())
}

fn check_condition_operators(condition: &Condition, node: &str, event: &str) -> Result<(), CompileError> {
    // Probing against an empty root surfaces unknown-operator errors without
    // requiring live data; arity/type errors are tolerated here since they
    // may depend on runtime values the probe root lacks.
    match logic::evaluate(&condition.condition, &serde_json::Value::Null) {
        Err(err) if err.kind == crate::logic::LogicErrorKind::UnknownOp => Err(CompileError::UnknownOperator {
            node: node.to_string(),
            event: event.to_string(),
            detail: err.detail,
        }),
        _ => Ok(()),
    }
}
