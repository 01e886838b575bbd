//! JSON-logic tree evaluator.
//!
//! Closed operator set (`var`, comparisons, logical, arithmetic, string/array,
//! `if`). Pure, synchronous, deterministic — failures are always a
//! [`LogicError`], never a host panic, so callers (the transition resolver,
//! guards) can fold evaluation failures into the §7 error taxonomy.

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::path;

/// Why a logic tree failed to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicErrorKind {
    UnknownOp,
    Arity,
    Type,
}

#[derive(Debug, Error, Diagnostic)]
#[error("logic evaluation failed: {kind:?} ({detail})")]
#[diagnostic(code(flowspire::logic::evaluation_failed))]
pub struct LogicError {
    pub kind: LogicErrorKind,
    pub detail: String,
}

impl LogicError {
    fn unknown_op(op: &str) -> Self {
        Self {
            kind: LogicErrorKind::UnknownOp,
            detail: format!("unknown operator '{op}'"),
        }
    }

    fn arity(op: &str, expected: &str, got: usize) -> Self {
        Self {
            kind: LogicErrorKind::Arity,
            detail: format!("'{op}' expects {expected}, got {got} operand(s)"),
        }
    }

    fn ty(op: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: LogicErrorKind::Type,
            detail: format!("'{op}': {}", detail.into()),
        }
    }
}

/// Evaluates a JSON-logic tree `node` against `root`.
///
/// # Errors
/// Returns [`LogicError`] on an unknown operator, wrong arity, or a type
/// mismatch that the closed operator set cannot coerce around.
pub fn evaluate(node: &Value, root: &Value) -> Result<Value, LogicError> {
    match node {
        Value::Object(map) if map.len() == 1 => {
            let (op, args) = map.iter().next().expect("len == 1");
            apply(op, args, root)
        }
        // Non-operator-shaped values (numbers, strings, bools, arrays,
        // multi-key objects, null) are literals.
        other => Ok(other.clone()),
    }
}

fn operand_list(args: &Value) -> Vec<Value> {
    match args {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn apply(op: &str, args: &Value, root: &Value) -> Result<Value, LogicError> {
    match op {
        "var" => eval_var(args, root),
        "==" | "===" => eval_cmp(op, args, root, |a, b| values_equal(&a, &b)),
        "!=" | "!==" => eval_cmp(op, args, root, |a, b| !values_equal(&a, &b)),
        "<" => eval_numeric_cmp(op, args, root, |a, b| a < b),
        "<=" => eval_numeric_cmp(op, args, root, |a, b| a <= b),
        ">" => eval_numeric_cmp(op, args, root, |a, b| a > b),
        ">=" => eval_numeric_cmp(op, args, root, |a, b| a >= b),
        "and" => eval_logical_and(args, root),
        "or" => eval_logical_or(args, root),
        "!" => eval_not(args, root, false),
        "!!" => eval_not(args, root, true),
        "+" | "-" | "*" | "/" | "%" => eval_arith(op, args, root),
        "in" => eval_in(args, root),
        "cat" => eval_cat(args, root),
        "length" => eval_length(args, root),
        "if" => eval_if(args, root),
        other => Err(LogicError::unknown_op(other)),
    }
}

fn eval_operands(args: &Value, root: &Value) -> Result<Vec<Value>, LogicError> {
    operand_list(args).iter().map(|v| evaluate(v, root)).collect()
}

fn eval_var(args: &Value, root: &Value) -> Result<Value, LogicError> {
    match args {
        Value::String(path_str) => Ok(path::get(root, path_str).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if !items.is_empty() => {
            let path_val = evaluate(&items[0], root)?;
            let path_str = path_val.as_str().ok_or_else(|| {
                LogicError::ty("var", "path operand must be a string")
            })?;
            match path::get(root, path_str) {
                Some(v) => Ok(v.clone()),
                None => Ok(items.get(1).cloned().unwrap_or(Value::Null)),
            }
        }
        Value::Array(_) => Err(LogicError::arity("var", "1-2 operands", 0)),
        other => Ok(path::get(root, &other.to_string()).cloned().unwrap_or(Value::Null)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    // Loose `==` coercion for the number/string pairing JSON-logic expects;
    // `===` callers rely on exact `PartialEq` so they never reach here.
    match (a, b) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        _ => false,
    }
}

fn eval_cmp(
    op: &str,
    args: &Value,
    root: &Value,
    f: impl Fn(Value, Value) -> bool,
) -> Result<Value, LogicError> {
    let operands = eval_operands(args, root)?;
    if operands.len() != 2 {
        return Err(LogicError::arity(op, "2 operands", operands.len()));
    }
    let mut it = operands.into_iter();
    let a = it.next().unwrap();
    let b = it.next().unwrap();
    if op == "===" || op == "!==" {
        let eq = a == b;
        return Ok(Value::Bool(if op == "===" { eq } else { !eq }));
    }
    Ok(Value::Bool(f(a, b)))
}

fn as_f64(op: &str, v: &Value) -> Result<f64, LogicError> {
    v.as_f64()
        .ok_or_else(|| LogicError::ty(op, format!("expected number, got {v}")))
}

fn eval_numeric_cmp(
    op: &str,
    args: &Value,
    root: &Value,
    f: impl Fn(f64, f64) -> bool,
) -> Result<Value, LogicError> {
    let operands = eval_operands(args, root)?;
    if operands.len() != 2 {
        return Err(LogicError::arity(op, "2 operands", operands.len()));
    }
    let a = as_f64(op, &operands[0])?;
    let b = as_f64(op, &operands[1])?;
    Ok(Value::Bool(f(a, b)))
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

fn eval_logical_and(args: &Value, root: &Value) -> Result<Value, LogicError> {
    let mut last = Value::Bool(true);
    for raw in operand_list(args) {
        last = evaluate(&raw, root)?;
        if !truthy(&last) {
            return Ok(last);
        }
    }
    Ok(last)
}

fn eval_logical_or(args: &Value, root: &Value) -> Result<Value, LogicError> {
    let mut last = Value::Bool(false);
    for raw in operand_list(args) {
        last = evaluate(&raw, root)?;
        if truthy(&last) {
            return Ok(last);
        }
    }
    Ok(last)
}

fn eval_not(args: &Value, root: &Value, double: bool) -> Result<Value, LogicError> {
    let operands = eval_operands(args, root)?;
    let op = if double { "!!" } else { "!" };
    if operands.len() != 1 {
        return Err(LogicError::arity(op, "1 operand", operands.len()));
    }
    let t = truthy(&operands[0]);
    Ok(Value::Bool(if double { t } else { !t }))
}

fn eval_arith(op: &str, args: &Value, root: &Value) -> Result<Value, LogicError> {
    let operands = eval_operands(args, root)?;
    if operands.is_empty() {
        return Err(LogicError::arity(op, "at least 1 operand", 0));
    }
    let mut nums = operands.iter().map(|v| as_f64(op, v));
    let mut acc = nums.next().unwrap()?;
    if operands.len() == 1 && op == "-" {
        return Ok(json_number(-acc));
    }
    for n in nums {
        let n = n?;
        acc = match op {
            "+" => acc + n,
            "-" => acc - n,
            "*" => acc * n,
            "/" => acc / n,
            "%" => acc % n,
            _ => unreachable!(),
        };
    }
    Ok(json_number(acc))
}

fn json_number(f: f64) -> Value {
    serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn eval_in(args: &Value, root: &Value) -> Result<Value, LogicError> {
    let operands = eval_operands(args, root)?;
    if operands.len() != 2 {
        return Err(LogicError::arity("in", "2 operands", operands.len()));
    }
    let needle = &operands[0];
    let found = match &operands[1] {
        Value::Array(items) => items.iter().any(|v| values_equal(v, needle)),
        Value::String(haystack) => needle
            .as_str()
            .map(|n| haystack.contains(n))
            .unwrap_or(false),
        _ => false,
    };
    Ok(Value::Bool(found))
}

fn eval_cat(args: &Value, root: &Value) -> Result<Value, LogicError> {
    let operands = eval_operands(args, root)?;
    let mut out = String::new();
    for v in operands {
        match v {
            Value::String(s) => out.push_str(&s),
            Value::Null => {}
            other => out.push_str(&other.to_string()),
        }
    }
    Ok(Value::String(out))
}

fn eval_length(args: &Value, root: &Value) -> Result<Value, LogicError> {
    let operands = eval_operands(args, root)?;
    if operands.len() != 1 {
        return Err(LogicError::arity("length", "1 operand", operands.len()));
    }
    let len = match &operands[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        other => return Err(LogicError::ty("length", format!("expected string or array, got {other}"))),
    };
    Ok(Value::Number(len.into()))
}

fn eval_if(args: &Value, root: &Value) -> Result<Value, LogicError> {
    let branches = operand_list(args);
    if branches.is_empty() {
        return Err(LogicError::arity("if", "at least 1 operand", 0));
    }
    let mut i = 0;
    while i + 1 < branches.len() {
        let cond = evaluate(&branches[i], root)?;
        if truthy(&cond) {
            return evaluate(&branches[i + 1], root);
        }
        i += 2;
    }
    if i < branches.len() {
        evaluate(&branches[i], root)
    } else {
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn var_reads_dotted_path_with_default() {
        let root = json!({"score": 90});
        assert_eq!(evaluate(&json!({"var": "score"}), &root).unwrap(), json!(90));
        assert_eq!(
            evaluate(&json!({"var": ["missing", "fallback"]}), &root).unwrap(),
            json!("fallback")
        );
    }

    #[test]
    fn comparisons_cover_closed_operator_set() {
        let root = json!({"score": 90});
        assert_eq!(
            evaluate(&json!({">": [{"var": "score"}, 80]}), &root).unwrap(),
            json!(true)
        );
        assert_eq!(evaluate(&json!({"==": [1, 1]}), &root).unwrap(), json!(true));
        assert_eq!(evaluate(&json!({"===": [1, "1"]}), &root).unwrap(), json!(false));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let root = json!({});
        assert_eq!(evaluate(&json!({"and": [true, false, true]}), &root).unwrap(), json!(false));
        assert_eq!(evaluate(&json!({"or": [false, 0, "x"]}), &root).unwrap(), json!("x"));
        assert_eq!(evaluate(&json!({"!": [false]}), &root).unwrap(), json!(true));
        assert_eq!(evaluate(&json!({"!!": [1]}), &root).unwrap(), json!(true));
    }

    #[test]
    fn arithmetic_operators_compute() {
        let root = json!({});
        assert_eq!(evaluate(&json!({"+": [1, 2, 3]}), &root).unwrap(), json!(6.0));
        assert_eq!(evaluate(&json!({"%": [10, 3]}), &root).unwrap(), json!(1.0));
    }

    #[test]
    fn string_array_operators() {
        let root = json!({});
        assert_eq!(evaluate(&json!({"in": ["a", ["a", "b"]]}), &root).unwrap(), json!(true));
        assert_eq!(evaluate(&json!({"cat": ["a", "b", 1]}), &root).unwrap(), json!("ab1"));
        assert_eq!(evaluate(&json!({"length": ["abc"]}), &root).unwrap(), json!(3));
    }

    #[test]
    fn if_picks_first_truthy_branch_or_else() {
        let root = json!({});
        let tree = json!({"if": [false, "a", true, "b", "c"]});
        assert_eq!(evaluate(&tree, &root).unwrap(), json!("b"));
        let tree_else = json!({"if": [false, "a", false, "b", "c"]});
        assert_eq!(evaluate(&tree_else, &root).unwrap(), json!("c"));
    }

    #[test]
    fn unknown_operator_is_a_logic_error() {
        let root = json!({});
        let err = evaluate(&json!({"bogus-op": []}), &root).unwrap_err();
        assert_eq!(err.kind, LogicErrorKind::UnknownOp);
    }

    #[test]
    fn wrong_arity_is_a_logic_error() {
        let root = json!({});
        let err = evaluate(&json!({"==": [1]}), &root).unwrap_err();
        assert_eq!(err.kind, LogicErrorKind::Arity);
    }
}
