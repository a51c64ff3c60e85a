//! Structured logging integration tests

use common::{ExecutionContext, LoggingConfig, OperationTimer, PerformanceMetrics, StructuredLogEntry};
use serde_json::Value;
use std::collections::HashMap;

#[test]
fn test_execution_context_defaults() {
    let context = ExecutionContext::default();
    assert_eq!(context.service, "concierge");
    assert_eq!(context.pid, std::process::id());
    assert!(!context.hostname.is_empty());
    assert!(!context.app_version.is_empty());
}

#[test]
fn test_entry_without_context_omits_optional_sections() {
    let entry = StructuredLogEntry {
        timestamp: "2024-01-01T00:00:00Z".to_string(),
        level: "WARN".to_string(),
        target: "orchestrator::connections".to_string(),
        message: "Dropping dead channel".to_string(),
        fields: HashMap::new(),
        context: None,
        performance: None,
    };

    let value = serde_json::to_value(&entry).unwrap();
    assert_eq!(value["level"], "WARN");
    assert!(value.get("context").is_none());
    assert!(value.get("performance").is_none());
}

#[test]
fn test_fields_are_flattened() {
    let mut fields = HashMap::new();
    fields.insert("user_id".to_string(), Value::String("u-9".to_string()));

    let entry = StructuredLogEntry {
        timestamp: "2024-01-01T00:00:00Z".to_string(),
        level: "INFO".to_string(),
        target: "orchestrator::coordinator".to_string(),
        message: "Request handled".to_string(),
        fields,
        context: None,
        performance: Some(PerformanceMetrics {
            duration_ms: Some(7),
            items_processed: None,
        }),
    };

    let value = serde_json::to_value(&entry).unwrap();
    assert_eq!(value["user_id"], "u-9");
    assert_eq!(value["performance"]["duration_ms"], 7);
}

#[test]
fn test_builder_methods() {
    let config = LoggingConfig::default()
        .with_level_name("trace")
        .with_json_output(true);
    assert_eq!(config.level, tracing::Level::TRACE);
    assert!(config.json_output);
    assert!(config.include_context);
}

#[test]
fn test_timer_finishes_without_subscriber() {
    let mut timer = OperationTimer::new("broadcast");
    timer.add_field("items_count", 3);
    assert!(timer.elapsed_ms() < 60_000);
    timer.finish();
}
