//! DAG file handling and validation, end to end

use sentra::dag::{self, IssueCode};
use sentra::{execution_order, load_schema, save_schema, validate};

#[test]
fn demo_files_validate_cleanly() {
    for path in ["demos/full-scan.yaml", "demos/quick-discovery.yaml"] {
        let schema = load_schema(path).unwrap();
        let result = validate(&schema);
        assert!(
            result.is_valid(),
            "{} invalid: {}",
            path,
            result.error_summary()
        );
        assert!(!result.has_warnings(), "{} has warnings", path);
    }
}

#[test]
fn demo_full_scan_layers() {
    let schema = load_schema("demos/full-scan.yaml").unwrap();
    let layers = execution_order(&schema).unwrap();
    assert_eq!(
        layers,
        vec![
            vec!["discovery"],
            vec!["port-scan"],
            vec!["services"],
            vec!["report"],
        ]
    );
}

#[test]
fn round_trip_across_formats_is_lossless() {
    let dir = tempfile::tempdir().unwrap();
    let schema = load_schema("demos/full-scan.yaml").unwrap();

    let yaml_path = dir.path().join("copy.yaml");
    save_schema(&schema, &yaml_path).unwrap();
    assert_eq!(load_schema(&yaml_path).unwrap(), schema);

    let json_path = dir.path().join("copy.json");
    save_schema(&schema, &json_path).unwrap();
    assert_eq!(load_schema(&json_path).unwrap(), schema);
}

#[test]
fn cycle_in_file_fails_validation_and_ordering() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cycle.yaml");
    std::fs::write(
        &path,
        r#"
name: cyclic
nodes:
  - id: a
    module: target_discovery
    depends_on: [b]
    produces: [d.a]
  - id: b
    module: target_discovery
    depends_on: [a]
    produces: [d.b]
"#,
    )
    .unwrap();

    let schema = load_schema(&path).unwrap();
    let result = validate(&schema);
    let cycles: Vec<_> = result
        .errors
        .iter()
        .filter(|e| e.code == IssueCode::Cycle)
        .collect();
    assert_eq!(cycles.len(), 1);

    let err = execution_order(&schema).unwrap_err();
    assert_eq!(err.code(), "DAG_INVALID");
}

#[test]
fn validation_aggregates_every_issue() {
    let yaml = r#"
name: broken
nodes:
  - id: a
    module: target_discovery
    depends_on: [ghost, a]
    consumes: [never.produced]
    produces: [d.a]
  - id: a
    module: ""
    produces: [d.dup]
"#;
    let schema: sentra::DagSchema = serde_yaml::from_str(yaml).unwrap();
    let result = dag::validate(&schema);

    let codes: Vec<IssueCode> = result.errors.iter().map(|e| e.code).collect();
    assert!(codes.contains(&IssueCode::DuplicateId));
    assert!(codes.contains(&IssueCode::MissingModule));
    assert!(codes.contains(&IssueCode::MissingDependency));
    assert!(codes.contains(&IssueCode::DataFlow));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.code == IssueCode::SelfDependency));
}
