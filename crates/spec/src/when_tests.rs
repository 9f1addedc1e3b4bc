use super::*;
use serde_json::json;

#[test]
fn parses_and_or_not_precedence() {
    let expr = parse("jobs.a.success and not jobs.b.failed or env.FORCE").unwrap();
    // `and`/`not` bind tighter than `or`
    assert!(matches!(expr, WhenExpr::Or(_, _)));
}

#[test]
fn parses_comparison() {
    let expr = parse("jobs.a.exit_code == 0").unwrap();
    assert!(matches!(expr, WhenExpr::Compare(CmpOp::Eq, _, _)));
}

#[test]
fn parses_parenthesized_grouping() {
    let expr = parse("(jobs.a.success or jobs.b.success) and not env.SKIP").unwrap();
    assert!(matches!(expr, WhenExpr::And(_, _)));
}

#[test]
fn rejects_function_call() {
    let err = parse("contains(jobs.a.output, \"x\")").unwrap_err();
    assert!(matches!(err, WhenError::UnexpectedToken(_) | WhenError::InvalidRoot(_)));
}

#[test]
fn rejects_unrooted_attribute() {
    let err = parse("foo.bar == 1").unwrap_err();
    assert_eq!(err, WhenError::InvalidRoot("foo.bar".to_string()));
}

#[test]
fn rejects_trailing_garbage() {
    let err = parse("true true").unwrap_err();
    assert!(matches!(err, WhenError::TrailingInput(_)));
}

#[test]
fn evaluates_bool_literal() {
    let expr = parse("true").unwrap();
    assert!(eval_bool(&expr, &json!({})).unwrap());
}

#[test]
fn evaluates_attribute_lookup() {
    let expr = parse("jobs.a.success").unwrap();
    let view = json!({ "jobs": { "a": { "success": true } } });
    assert!(eval_bool(&expr, &view).unwrap());
}

#[test]
fn evaluates_numeric_comparison() {
    let expr = parse("jobs.a.exit_code == 0").unwrap();
    let view = json!({ "jobs": { "a": { "exit_code": 0 } } });
    assert!(eval_bool(&expr, &view).unwrap());
}

#[test]
fn evaluates_and_or_not_combination() {
    let expr = parse("jobs.a.success and not jobs.b.success").unwrap();
    let view = json!({ "jobs": { "a": { "success": true }, "b": { "success": false } } });
    assert!(eval_bool(&expr, &view).unwrap());
}

#[test]
fn missing_attribute_is_eval_error() {
    let expr = parse("jobs.missing.success").unwrap();
    let err = eval_bool(&expr, &json!({ "jobs": {} })).unwrap_err();
    assert!(matches!(err, EvalError::MissingAttribute(_)));
}

#[test]
fn env_root_is_accepted() {
    let expr = parse("env.FORCE_RUN == true").unwrap();
    let view = json!({ "env": { "FORCE_RUN": true } });
    assert!(eval_bool(&expr, &view).unwrap());
}

#[test]
fn incomparable_types_is_eval_error() {
    let expr = parse("jobs.a.x == jobs.a.y").unwrap();
    let view = json!({ "jobs": { "a": { "x": 1, "y": "s" } } });
    assert!(matches!(eval_bool(&expr, &view).unwrap_err(), EvalError::Incomparable(_, _)));
}
