use recordmapper::{
    ErrorCode, FieldMapping, MapperConfig, OutputTableSpec, RecordSchema, parse_mapper_config,
    validate_config,
};
use serde_json::json;

fn codes(yaml: &str) -> Vec<ErrorCode> {
    let config = parse_mapper_config(yaml).expect("failed to parse config");
    match validate_config(&config) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.into_iter().map(|err| err.code).collect(),
    }
}

#[test]
fn valid_config_has_no_errors() {
    let yaml = r#"
global_vars:
  - {name: tag, exp: "${literal('x')}"}
outputs:
  - name: t
    filter: "${input.main.id:gt(0)}"
    schema:
      type: record
      name: t
      fields:
        - {name: id, type: int}
        - {name: tags, type: {type: array, items: string}}
    fields:
      - {path: /id, exp: /id}
      - {path: "/tags[0]", exp: "${tag}"}
"#;
    assert!(codes(yaml).is_empty());
}

#[test]
fn errors_carry_config_locations() {
    let yaml = r#"
outputs:
  - name: t
    filter: "${id:gt(}"
    schema:
      type: record
      name: t
      fields:
        - {name: id, type: int}
    fields:
      - {path: /nope, exp: /id}
"#;
    let config = parse_mapper_config(yaml).expect("config");
    let errors = validate_config(&config).expect_err("should fail");
    let found: Vec<(ErrorCode, Option<String>)> =
        errors.into_iter().map(|err| (err.code, err.path)).collect();
    assert_eq!(
        found,
        vec![
            (ErrorCode::InvalidFilter, Some("outputs[0].filter".to_string())),
            (ErrorCode::UnknownTarget, Some("outputs[0].fields[0]".to_string())),
        ]
    );
}

#[test]
fn schema_errors_fail_config_parsing() {
    let yaml = r#"
outputs:
  - name: t
    schema:
      type: record
      name: t
      fields:
        - {name: id, type: decimal128}
"#;
    let err = parse_mapper_config(yaml).expect_err("unknown type");
    assert!(err.to_string().contains("decimal128"));
}

#[test]
fn configs_built_in_code_validate_the_same_way() {
    let schema = RecordSchema::from_json(&json!({
        "type": "record",
        "name": "t",
        "fields": [{"name": "id", "type": "int"}]
    }))
    .expect("schema");
    let mut table = OutputTableSpec::new("t", schema);
    table.add_field(FieldMapping::new("/id", "/id"));
    table.add_field(FieldMapping::new("/id[0]", "/id"));
    let config = MapperConfig {
        global_vars: Vec::new(),
        input: Default::default(),
        outputs: vec![table],
    };
    let errors = validate_config(&config).expect_err("index into int");
    assert_eq!(errors[0].code, ErrorCode::InvalidTarget);

    let yaml = serde_yaml::to_string(&config).expect("serialize");
    let reparsed = parse_mapper_config(&yaml).expect("reparse");
    assert_eq!(reparsed, config);
}

#[test]
fn bad_literal_regex_in_record_path_is_a_config_error() {
    let yaml = r#"
outputs:
  - name: t
    schema:
      type: record
      name: t
      fields:
        - {name: digits, type: string}
    fields:
      - {path: /digits, exp: "replaceRegex(/phone, '[0-9', '')"}
"#;
    assert_eq!(codes(yaml), vec![ErrorCode::InvalidExpression]);

    let fixed = yaml.replace("'[0-9'", "'[^0-9]'");
    assert!(codes(&fixed).is_empty());
}
