//! Loading schema configuration from YAML files

use relgraph::config::SchemaConfig;
use relgraph::core::ConfigError;
use relgraph::server::ServerBuilder;
use std::io::Write;
use tempfile::NamedTempFile;

const SHOP: &str = r#"
settings:
  batch_max_in_clause: 50
  default_page_size: 20
tables:
  - name: customers
    primary_key: [id]
    columns:
      - { name: id, type: int, generated: true }
      - { name: email, type: text }
    indexes:
      - { name: customers_email_key, columns: [email], unique: true }
    relationships:
      - name: orders
        kind: one_to_many
        target: orders
        local_columns: [id]
        remote_columns: [customer_id]
  - name: orders
    primary_key: [id]
    columns:
      - { name: id, type: int, generated: true }
      - { name: customer_id, type: int }
      - { name: total, type: float }
"#;

fn yaml_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write yaml");
    file
}

#[test]
fn test_load_from_file() {
    let file = yaml_file(SHOP);
    let path = file.path().to_str().unwrap();

    let config = SchemaConfig::from_yaml_file(path).unwrap();
    assert_eq!(config.settings.batch_max_in_clause, 50);
    assert_eq!(config.settings.default_page_size, 20);
    assert_eq!(config.tables.len(), 2);

    let schema = config.into_schema().unwrap();
    let customers = schema.table("customers").unwrap();
    assert_eq!(customers.type_name, "Customer");
    assert_eq!(customers.relationships.len(), 1);
}

#[test]
fn test_builder_from_file() {
    let file = yaml_file(SHOP);
    let mut builder = ServerBuilder::new()
        .with_config_file(file.path().to_str().unwrap())
        .unwrap()
        .with_in_memory();

    let host = builder.build_host().unwrap();
    assert_eq!(host.settings().batch_max_in_clause, 50);
    assert!(host.schema.table("orders").is_some());
}

#[test]
fn test_missing_file() {
    let err = SchemaConfig::from_yaml_file("/definitely/not/here.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}

#[test]
fn test_parse_error_names_file() {
    let file = yaml_file("tables: [unclosed");
    let path = file.path().to_str().unwrap();

    let err = SchemaConfig::from_yaml_file(path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { file: Some(_), .. }));
    assert!(err.to_string().contains(path));
}

#[test]
fn test_unknown_relationship_target() {
    let yaml = SHOP.replace("target: orders", "target: invoices");
    let err = SchemaConfig::from_yaml_str(&yaml)
        .unwrap()
        .into_schema()
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownReference { .. }));
    assert!(err.to_string().contains("invoices"));
}

#[test]
fn test_zero_batch_size_rejected() {
    let yaml = SHOP.replace("batch_max_in_clause: 50", "batch_max_in_clause: 0");
    let err = SchemaConfig::from_yaml_str(&yaml).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}
