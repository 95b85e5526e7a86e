use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("cubes".to_string()), None).unwrap();
    register_custom_metrics(&registry);
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    OPS_STARTED.with_label_values(&["download"]).inc();
    let metrics = &registry.gather();
    assert!(!metrics.is_empty());

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        metric_names.contains(&"cubes_blob_ops_started"),
        "Missing cubes_blob_ops_started"
    );
}

#[test]
fn test_counter_increment() {
    KV_MESSAGES_SENT.with_label_values(&["metrics-test"]).inc();
    KV_MESSAGES_SENT.with_label_values(&["metrics-test"]).inc();

    let value = KV_MESSAGES_SENT.with_label_values(&["metrics-test"]).get();
    assert_eq!(value, 2, "Counter should increment correctly");
}

#[test]
fn test_gather_renders_text_format() {
    init_metrics();
    CACHE_FILES_SWEPT.inc_by(0);
    let body = gather_metrics();
    assert!(body.contains("blob_cache_files_swept"));
}
