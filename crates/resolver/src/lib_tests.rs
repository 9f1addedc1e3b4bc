use super::*;
use serde_json::json;

fn root() -> Value {
    json!({
        "env": { "HOST": "db.internal", "EMPTY": "", "PORT": 5432 },
        "steps": { "check_items": { "has_data": true, "count": 3 } },
        "job": {},
        "jobs": { "probe": { "outputs": { "has_data": false, "count": 0 } } },
        "run_id": "r-1",
        "flow_id": "f-1",
    })
}

#[test]
fn renders_plain_literal_unchanged() {
    assert_eq!(render("no templates here", &root()).unwrap(), "no templates here");
}

#[test]
fn renders_single_token() {
    assert_eq!(render("{{env.HOST}}", &root()).unwrap(), "db.internal");
}

#[test]
fn renders_token_embedded_in_text() {
    assert_eq!(
        render("postgres://{{env.HOST}}:{{env.PORT}}/db", &root()).unwrap(),
        "postgres://db.internal:5432/db"
    );
}

#[test]
fn allows_whitespace_around_path() {
    assert_eq!(render("{{ env.HOST }}", &root()).unwrap(), "db.internal");
}

#[test]
fn missing_key_without_default_errors() {
    let err = render("{{env.MISSING}}", &root()).unwrap_err();
    assert_eq!(err, ResolverError::MissingKey("env.MISSING".to_string()));
}

#[test]
fn missing_key_with_default_renders_default() {
    assert_eq!(
        render("{{env.MISSING:localhost}}", &root()).unwrap(),
        "localhost"
    );
}

#[test]
fn empty_string_value_counts_as_missing() {
    assert_eq!(
        render("{{env.EMPTY:fallback}}", &root()).unwrap(),
        "fallback"
    );
}

#[test]
fn nested_path_traverses_objects() {
    assert_eq!(
        render("{{steps.check_items.has_data}}", &root()).unwrap(),
        "true"
    );
}

#[test]
fn disallowed_root_is_missing_key_error() {
    // `result` isn't in this root at all (wrong phase) — manifests as missing.
    let err = render("{{result.thing}}", &root()).unwrap_err();
    assert_eq!(err, ResolverError::MissingKey("result.thing".to_string()));
}

#[test]
fn dollar_brace_is_syntax_error() {
    let err = render("{{env.HOST}} and ${env.X}", &root()).unwrap_err();
    assert_eq!(err, ResolverError::Syntax);
}

#[test]
fn syntax_error_message_is_fixed() {
    let err = render("${env.X}", &root()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Unsupported templating syntax. Use {{VAR}} or {{VAR:DEFAULT}}"
    );
}

#[test]
fn jinja_statement_braces_are_syntax_errors() {
    assert_eq!(render("{% if x %}", &root()).unwrap_err(), ResolverError::Syntax);
    assert_eq!(render("{# comment #}", &root()).unwrap_err(), ResolverError::Syntax);
}

#[test]
fn bare_single_brace_is_syntax_error() {
    assert_eq!(render("{not_a_token}", &root()).unwrap_err(), ResolverError::Syntax);
    assert_eq!(render("stray } brace", &root()).unwrap_err(), ResolverError::Syntax);
}

#[test]
fn unterminated_token_is_syntax_error() {
    assert_eq!(render("{{env.HOST", &root()).unwrap_err(), ResolverError::Syntax);
}

#[test]
fn invalid_path_characters_are_syntax_error() {
    assert_eq!(render("{{env.HOST-NAME}}", &root()).unwrap_err(), ResolverError::Syntax);
    assert_eq!(render("{{env..HOST}}", &root()).unwrap_err(), ResolverError::Syntax);
}

#[test]
fn rendering_is_idempotent() {
    let once = render("{{env.HOST}}/x", &root()).unwrap();
    let twice = render(&once, &root()).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn standalone_var_detects_single_token() {
    let parsed = as_standalone_var("{{env.HOST}}").unwrap();
    assert_eq!(parsed, Some(("env.HOST".to_string(), None)));
}

#[test]
fn standalone_var_rejects_concatenated_text() {
    let parsed = as_standalone_var("prefix-{{env.HOST}}").unwrap();
    assert_eq!(parsed, None);
}

#[test]
fn standalone_var_rejects_plain_literal() {
    let parsed = as_standalone_var("plain text").unwrap();
    assert_eq!(parsed, None);
}

#[test]
fn referenced_paths_collects_every_var_in_order() {
    let paths = referenced_paths("{{resources.db.dsn}}/{{env.SCHEMA:public}}").unwrap();
    assert_eq!(paths, vec!["resources.db.dsn".to_string(), "env.SCHEMA".to_string()]);
}

#[test]
fn referenced_paths_empty_for_plain_literal() {
    assert_eq!(referenced_paths("no vars here").unwrap(), Vec::<String>::new());
}

mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn idents_with_underscores_and_digits_parse(
            ident in "[A-Za-z_][A-Za-z0-9_]{0,12}"
        ) {
            let mut vars = serde_json::Map::new();
            vars.insert(ident.clone(), Value::String("v".to_string()));
            let mut env = serde_json::Map::new();
            env.insert("env".to_string(), Value::Object(vars));
            let root = Value::Object(env);
            let template = format!("{{{{env.{ident}}}}}");
            prop_assert_eq!(render(&template, &root).unwrap(), "v".to_string());
        }
    }
}
