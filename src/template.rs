//! Template resolver — expands `{{dotted.path}}` (and legacy `{path}`)
//! references against a data root.
//!
//! Pure and synchronous: there is no code evaluation here, only dotted-path
//! substitution via [`crate::path::get`].

use serde_json::Value;

use crate::path;

/// A structurally-typed template, the `{$template: "..."}` form mentioned in
/// §4.B as a future extension for carrying type metadata alongside the raw
/// expression string.
const TEMPLATE_KEY: &str = "$template";

/// Expands every `{{expr}}` / legacy `{expr}` occurrence in `value` against
/// `root`, recursing into objects and arrays. Strings with no template
/// markers pass through unchanged (same `Value` variant, cloned content).
#[must_use]
pub fn resolve(value: &Value, root: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, root)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, root)).collect()),
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(expr)) = map.get(TEMPLATE_KEY) {
                    return Value::String(resolve_str(expr, root));
                }
            }
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve(v, root));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Expands template markers inside a single string.
#[must_use]
pub fn resolve_str(input: &str, root: &Value) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if input[i..].starts_with("{{") {
            if let Some(end) = input[i + 2..].find("}}") {
                let expr = &input[i + 2..i + 2 + end];
                out.push_str(&stringify_lookup(expr, root));
                i += 2 + end + 2;
                continue;
            }
        } else if bytes[i] == b'{' {
            if let Some(end) = input[i + 1..].find('}') {
                let expr = &input[i + 1..i + 1 + end];
                // Legacy single-brace form: only treat as a template if the
                // body looks like a bare dotted path (no nested braces/spaces
                // around operators), otherwise leave the literal text alone.
                if is_legacy_expr(expr) {
                    out.push_str(&stringify_lookup(expr, root));
                    i += 1 + end + 1;
                    continue;
                }
            }
        }
        let ch_len = input[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&input[i..i + ch_len]);
        i += ch_len;
    }
    out
}

fn is_legacy_expr(expr: &str) -> bool {
    let trimmed = expr.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '_' || c == '-')
}

fn stringify_lookup(expr: &str, root: &Value) -> String {
    match path::get(root, expr.trim()) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_double_brace_expressions() {
        let root = json!({"user": {"name": "Ada"}});
        assert_eq!(resolve_str("Hello, {{user.name}}!", &root), "Hello, Ada!");
    }

    #[test]
    fn nullish_lookups_become_empty_string() {
        let root = json!({});
        assert_eq!(resolve_str("[{{missing.path}}]", &root), "[]");
    }

    #[test]
    fn legacy_single_brace_form_is_supported() {
        let root = json!({"score": 42});
        assert_eq!(resolve_str("score={score}", &root), "score=42");
    }

    #[test]
    fn non_template_strings_pass_through() {
        let root = json!({});
        assert_eq!(resolve_str("just text {literal text}", &root), "just text {literal text}");
    }

    #[test]
    fn recurses_into_nested_structures() {
        let root = json!({"a": "X"});
        let value = json!({"k": ["{{a}}", {"inner": "{{a}}-{{a}}"}]});
        let resolved = resolve(&value, &root);
        assert_eq!(resolved, json!({"k": ["X", {"inner": "X-X"}]}));
    }

    #[test]
    fn typed_template_form_resolves_the_expr_field() {
        let root = json!({"a": {"b": 7}});
        let value = json!({"$template": "a.b"});
        assert_eq!(resolve(&value, &root), json!("7"));
    }
}
