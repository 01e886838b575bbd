//! Integration coverage for the compiler's cross-module invariants: the
//! legacy-string-condition opt-in and invoke-type checking against a live
//! [`CapabilityRegistry`]. Pure parse/normalize/validate unit behavior lives
//! in `src/compiler/*.rs`'s own `#[cfg(test)]` modules.

mod common;

use std::sync::Arc;

use flowspire::compiler::{compile, FlowDocument};
use flowspire::registry::CapabilityRegistry;

use common::{registry_with_http, ScriptedHttpService};

fn doc(json: serde_json::Value) -> FlowDocument {
    serde_json::from_value(json).unwrap()
}

#[test]
fn legacy_string_condition_is_rejected_by_default() {
    let document = doc(serde_json::json!({
        "id": "legacy",
        "initial": "a",
        "states": {
            "a": {"on": {"NEXT": {"target": {"default": "a", "conditions": [
                {"if": "{{context.ready}}", "to": "b"}
            ]}}}},
            "b": {"type": "final"}
        }
    }));
    let registry = CapabilityRegistry::new();
    let err = compile(&document, false, &registry).unwrap_err();
    assert!(matches!(
        err,
        flowspire::compiler::CompileError::LegacyStringConditionDisallowed { .. }
    ));
}

#[test]
fn legacy_string_condition_compiles_with_the_flag_set() {
    let document = doc(serde_json::json!({
        "id": "legacy",
        "initial": "a",
        "states": {
            "a": {"on": {"NEXT": {"target": {"default": "a", "conditions": [
                {"if": "{{context.ready}}", "to": "b"}
            ]}}}},
            "b": {"type": "final"}
        }
    }));
    let registry = CapabilityRegistry::new();
    let compiled = compile(&document, true, &registry).unwrap();
    assert!(compiled.node("a").is_some());
}

#[test]
fn invoke_referencing_an_unregistered_service_is_a_compile_error() {
    let document = doc(serde_json::json!({
        "id": "invoker",
        "initial": "a",
        "states": {
            "a": {
                "invoke": [{"id": "verify", "type": "payments", "config": {}}],
                "on": {"NEXT": "b"}
            },
            "b": {"type": "final"}
        }
    }));
    // registering *some* service under Services makes the invoke-type check
    // active; "payments" is never registered, so this must fail.
    let registry = registry_with_http(Arc::new(ScriptedHttpService::new(vec![common::Outcome::Ok(
        serde_json::json!({}),
    )])));
    let err = compile(&document, false, &registry).unwrap_err();
    assert!(matches!(
        err,
        flowspire::compiler::CompileError::UnknownInvokeType { .. }
    ));
}

#[test]
fn invoke_referencing_a_registered_service_compiles() {
    let document = doc(serde_json::json!({
        "id": "invoker",
        "initial": "a",
        "states": {
            "a": {
                "invoke": [{"id": "verify", "type": "http", "config": {}}],
                "on": {"NEXT": "b"}
            },
            "b": {"type": "final"}
        }
    }));
    let registry = registry_with_http(Arc::new(ScriptedHttpService::new(vec![common::Outcome::Ok(
        serde_json::json!({}),
    )])));
    let compiled = compile(&document, false, &registry).unwrap();
    assert_eq!(compiled.node("a").unwrap().invoke.len(), 1);
}

#[test]
fn next_shorthand_is_equivalent_to_an_explicit_on_next() {
    let shorthand = doc(serde_json::json!({
        "id": "shim",
        "initial": "a",
        "states": {
            "a": {"next": "b"},
            "b": {"type": "final"}
        }
    }));
    let registry = CapabilityRegistry::new();
    let compiled = compile(&shorthand, false, &registry).unwrap();
    let on_next = compiled.node("a").unwrap().on.get("NEXT").unwrap();
    assert!(matches!(
        on_next.target,
        flowspire::transition::TransitionTarget::Static(ref t) if t == "b"
    ));
}
