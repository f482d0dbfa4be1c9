use recordmapper::{ErrorCode, ExpressionCache, RecordMapper, Value, parse_mapper_config};
use serde_json::json;

const SCOPED: &str = r#"
global_vars:
  - name: yearOfBirth
    exp: "${input.main.birth:toDate('yyyy-MM-dd'):format('yyyy')}"
  - name: label
    exp: "${global._var_.yearOfBirth:prepend('born ')}"
input:
  vars:
    - name: last
      exp: "substringAfter(/name, ' ')"
outputs:
  - name: people
    vars:
      - name: first
        exp: "substringBefore(/name, ' ')"
      - name: shout
        exp: "${first:toUpper()}"
    schema:
      type: record
      name: people
      fields:
        - {name: first, type: string}
        - {name: last, type: string}
        - {name: year, type: string}
    fields:
      - {path: /first, exp: "${shout}"}
      - {path: /last, exp: "${input.main._var_.last}"}
      - {path: /year, exp: "${yearOfBirth}"}
  - name: summary
    schema:
      type: record
      name: summary
      fields:
        - {name: who, type: string}
        - {name: hidden, type: string}
        - {name: label, type: string}
    fields:
      - {path: /who, exp: "${output.people._var_.first}"}
      - {path: /hidden, exp: "[${shout}]"}
      - {path: /label, exp: "${global._var_.label}"}
"#;

#[test]
fn variables_are_visible_by_scope() {
    let mapper = RecordMapper::new(parse_mapper_config(SCOPED).expect("config")).expect("valid");
    let record = Value::from_json(json!({"name": "Tom Smith", "birth": "1990-05-17"}));
    let outcome = mapper.map_record(&record, &mut ExpressionCache::new());

    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(
        outcome.for_table("people").map(Value::to_json),
        Some(json!({"first": "TOM", "last": "Smith", "year": "1990"}))
    );
    assert_eq!(
        outcome.for_table("summary").map(Value::to_json),
        Some(json!({"who": "Tom", "hidden": "[]", "label": "born 1990"}))
    );
}

#[test]
fn record_dependent_globals_follow_each_record() {
    let mapper = RecordMapper::new(parse_mapper_config(SCOPED).expect("config")).expect("valid");
    let input = vec![
        Value::from_json(json!({"name": "A B", "birth": "1980-01-01"})),
        Value::from_json(json!({"name": "C D", "birth": "2001-12-31"})),
    ];
    let batch = mapper.map_batch(&input);
    let years: Vec<_> = batch
        .table("people")
        .expect("people")
        .records
        .iter()
        .map(|r| r.to_json()["year"].clone())
        .collect();
    assert_eq!(years, vec![json!("1980"), json!("2001")]);
}

#[test]
fn duplicate_variables_are_reported_and_last_declaration_wins() {
    let yaml = r#"
global_vars:
  - {name: x, exp: first}
  - {name: x, exp: second}
outputs:
  - name: t
    schema:
      type: record
      name: t
      fields:
        - {name: v, type: string}
    fields:
      - {path: /v, exp: "${x}"}
"#;
    let errors = match RecordMapper::new(parse_mapper_config(yaml).expect("config")) {
        Ok(_) => panic!("duplicate variables should be rejected"),
        Err(errors) => errors,
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::DuplicateVariable);
    assert_eq!(errors[0].path.as_deref(), Some("global_vars[1]"));

    let mapper = RecordMapper::lenient(parse_mapper_config(yaml).expect("config"));
    assert_eq!(mapper.config_errors().len(), 1);
    let outcome = mapper.map_record(&Value::from_json(json!({})), &mut ExpressionCache::new());
    assert_eq!(outcome.for_table("t").map(Value::to_json), Some(json!({"v": "second"})));
}

#[test]
fn global_record_paths_are_rejected_and_resolve_empty() {
    let yaml = r#"
global_vars:
  - {name: who, exp: /name}
outputs:
  - name: t
    schema:
      type: record
      name: t
      fields:
        - {name: v, type: string}
    fields:
      - {path: /v, exp: "<${who}>"}
"#;
    let errors = match RecordMapper::new(parse_mapper_config(yaml).expect("config")) {
        Ok(_) => panic!("global record path should be rejected"),
        Err(errors) => errors,
    };
    assert_eq!(errors[0].code, ErrorCode::GlobalRecordPath);

    let mapper = RecordMapper::lenient(parse_mapper_config(yaml).expect("config"));
    let outcome = mapper.map_record(&Value::from_json(json!({"name": "Ann"})), &mut ExpressionCache::new());
    assert_eq!(outcome.for_table("t").map(Value::to_json), Some(json!({"v": "<>"})));
}

#[test]
fn invalid_mappings_are_skipped_in_lenient_mode() {
    let yaml = r#"
outputs:
  - name: t
    schema:
      type: record
      name: t
      fields:
        - {name: a, type: string}
        - {name: b, type: string}
    fields:
      - {path: /a, exp: "${x:nope()}"}
      - {path: /b, exp: ok}
      - {path: /c, exp: dropped}
"#;
    let mapper = RecordMapper::lenient(parse_mapper_config(yaml).expect("config"));
    let codes: Vec<ErrorCode> = mapper.config_errors().iter().map(|e| e.code.clone()).collect();
    assert_eq!(codes, vec![ErrorCode::InvalidExpression, ErrorCode::UnknownTarget]);

    let outcome = mapper.map_record(&Value::from_json(json!({"a": "kept"})), &mut ExpressionCache::new());
    assert!(outcome.warnings.is_empty());
    assert_eq!(
        outcome.for_table("t").map(Value::to_json),
        Some(json!({"a": "kept", "b": "ok"}))
    );
}
