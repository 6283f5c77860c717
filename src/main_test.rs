use super::*;

#[test]
fn test_watcher_only_selects_managed_collectors() {
    let config = watcher_config();

    assert_eq!(
        config.label_selector.as_deref(),
        Some("app.kubernetes.io/managed-by=opentelemetry-operator")
    );
}
