//! Cluster access used by the upgrade engine
//!
//! Kept behind traits so the engine can run against in-memory stores in tests.

use super::UpgradeError;
use crate::crd::{OpenTelemetryCollector, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::{CrossVersionObjectReference, HorizontalPodAutoscaler};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Reads and writes collector instances
#[async_trait]
pub trait CollectorStore: Send + Sync {
    /// Every instance labelled as managed by this operator
    async fn list_managed(&self) -> Result<Vec<OpenTelemetryCollector>, UpgradeError>;

    /// Write an upgraded instance back
    ///
    /// The spec is sent as a merge patch computed against `original`, guarded by the
    /// original resourceVersion. The status goes to the status subresource.
    async fn persist(
        &self,
        original: &OpenTelemetryCollector,
        upgraded: &OpenTelemetryCollector,
    ) -> Result<(), UpgradeError>;
}

/// Reads and retargets HorizontalPodAutoscalers
#[async_trait]
pub trait AutoscalerStore: Send + Sync {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<HorizontalPodAutoscaler>, kube::Error>;

    /// Point `scaleTargetRef` of an autoscaler at `target`
    async fn retarget(
        &self,
        namespace: &str,
        name: &str,
        target: &CrossVersionObjectReference,
    ) -> Result<(), kube::Error>;
}

/// Collector store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeCollectorStore {
    client: Client,
    /// Restrict the scan to one namespace; `None` scans the whole cluster
    namespace: Option<String>,
}

impl KubeCollectorStore {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    fn api(&self, namespace: Option<&str>) -> Api<OpenTelemetryCollector> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait]
impl CollectorStore for KubeCollectorStore {
    async fn list_managed(&self) -> Result<Vec<OpenTelemetryCollector>, UpgradeError> {
        let params = ListParams::default().labels(&managed_selector());
        let list = self.api(self.namespace.as_deref()).list(&params).await?;
        Ok(list.items)
    }

    async fn persist(
        &self,
        original: &OpenTelemetryCollector,
        upgraded: &OpenTelemetryCollector,
    ) -> Result<(), UpgradeError> {
        let name = upgraded.name_any();
        let namespace = upgraded.namespace().unwrap_or_else(|| "default".to_string());
        let api = self.api(Some(&namespace));

        if let Some(patch) = spec_patch(original, upgraded)? {
            debug!(%namespace, %name, "Patching upgraded collector spec");
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }

        if original.status != upgraded.status {
            let status = json!({ "status": { "version": upgraded.status_version() } });
            api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&status))
                .await?;
        }
        Ok(())
    }
}

/// Autoscaler store backed by the Kubernetes API (`autoscaling/v2`)
#[derive(Clone)]
pub struct KubeAutoscalerStore {
    client: Client,
}

impl KubeAutoscalerStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AutoscalerStore for KubeAutoscalerStore {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<HorizontalPodAutoscaler>, kube::Error> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn retarget(
        &self,
        namespace: &str,
        name: &str,
        target: &CrossVersionObjectReference,
    ) -> Result<(), kube::Error> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "spec": { "scaleTargetRef": target } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Label selector matching operator-managed objects
pub fn managed_selector() -> String {
    format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE)
}

/// Merge patch turning the spec of `original` into the spec of `upgraded`
///
/// `None` when the specs are equal.
pub fn spec_patch(
    original: &OpenTelemetryCollector,
    upgraded: &OpenTelemetryCollector,
) -> Result<Option<Value>, serde_json::Error> {
    if original.spec == upgraded.spec {
        return Ok(None);
    }
    let before = serde_json::to_value(&original.spec)?;
    let after = serde_json::to_value(&upgraded.spec)?;

    let mut patch = json!({ "spec": merge_patch(&before, &after) });
    if let Some(rv) = original.resource_version() {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    Ok(Some(patch))
}

/// RFC 7386 merge patch from `before` to `after`
///
/// Keys dropped from an object become `null`; arrays and scalars are replaced whole.
pub fn merge_patch(before: &Value, after: &Value) -> Value {
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for key in old.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            for (key, value) in new {
                match old.get(key) {
                    Some(previous) if previous == value => {}
                    Some(previous) if previous.is_object() && value.is_object() => {
                        patch.insert(key.clone(), merge_patch(previous, value));
                    }
                    _ => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        _ => after.clone(),
    }
}

/// Whether `labels` satisfy an equality-based selector such as `a=b,c=d`
#[cfg(test)]
fn selector_matches(labels: &std::collections::BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.trim().is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => false,
        })
}

/// Autoscaler store over an in-memory list
#[cfg(test)]
#[derive(Default)]
pub struct MockAutoscalerStore {
    autoscalers: std::sync::Mutex<Vec<HorizontalPodAutoscaler>>,
    failing: std::sync::Mutex<Vec<String>>,
    retargeted: std::sync::Mutex<Vec<(String, String, CrossVersionObjectReference)>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockAutoscalerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hpa: HorizontalPodAutoscaler) {
        self.autoscalers.lock().unwrap().push(hpa);
    }

    /// Make `retarget` fail for the autoscaler called `name`
    pub fn fail_retarget(&self, name: &str) {
        self.failing.lock().unwrap().push(name.to_string());
    }

    /// `(namespace, name, target)` of every successful retarget, in call order
    pub fn retargeted(&self) -> Vec<(String, String, CrossVersionObjectReference)> {
        self.retargeted.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
#[allow(clippy::unwrap_used)]
impl AutoscalerStore for MockAutoscalerStore {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<HorizontalPodAutoscaler>, kube::Error> {
        Ok(self
            .autoscalers
            .lock()
            .unwrap()
            .iter()
            .filter(|hpa| hpa.metadata.namespace.as_deref() == Some(namespace))
            .filter(|hpa| selector_matches(hpa.labels(), label_selector))
            .cloned()
            .collect())
    }

    async fn retarget(
        &self,
        namespace: &str,
        name: &str,
        target: &CrossVersionObjectReference,
    ) -> Result<(), kube::Error> {
        if self.failing.lock().unwrap().iter().any(|n| n == name) {
            return Err(kube::Error::Service(
                format!("patch of {name} rejected").into(),
            ));
        }
        self.retargeted.lock().unwrap().push((
            namespace.to_string(),
            name.to_string(),
            target.clone(),
        ));
        Ok(())
    }
}

/// Collector store over an in-memory list
#[cfg(test)]
#[derive(Default)]
pub struct MockCollectorStore {
    instances: std::sync::Mutex<Vec<OpenTelemetryCollector>>,
    persisted: std::sync::Mutex<Vec<OpenTelemetryCollector>>,
    fail_list: std::sync::atomic::AtomicBool,
    fail_persist: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockCollectorStore {
    pub fn new(instances: Vec<OpenTelemetryCollector>) -> Self {
        Self {
            instances: std::sync::Mutex::new(instances),
            ..Self::default()
        }
    }

    pub fn fail_list(&self) {
        self.fail_list
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn fail_persist(&self, name: &str) {
        self.fail_persist.lock().unwrap().push(name.to_string());
    }

    /// Instances written back, in call order
    pub fn persisted(&self) -> Vec<OpenTelemetryCollector> {
        self.persisted.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
#[allow(clippy::unwrap_used)]
impl CollectorStore for MockCollectorStore {
    async fn list_managed(&self) -> Result<Vec<OpenTelemetryCollector>, UpgradeError> {
        if self.fail_list.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(kube::Error::Service("list rejected".into()).into());
        }
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn persist(
        &self,
        _original: &OpenTelemetryCollector,
        upgraded: &OpenTelemetryCollector,
    ) -> Result<(), UpgradeError> {
        let name = upgraded.name_any();
        if self.fail_persist.lock().unwrap().contains(&name) {
            return Err(kube::Error::Service(format!("update of {name} rejected").into()).into());
        }
        self.persisted.lock().unwrap().push(upgraded.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crd::CollectorSpec;

    #[test]
    fn test_merge_patch_nulls_removed_keys() {
        let before = json!({"replicas": 2, "minReplicas": 1, "config": "a"});
        let after = json!({"replicas": 2, "config": "b"});

        assert_eq!(
            merge_patch(&before, &after),
            json!({"minReplicas": null, "config": "b"})
        );
    }

    #[test]
    fn test_merge_patch_recurses_into_objects() {
        let before = json!({"args": {"--a": "1", "--b": "2"}});
        let after = json!({"args": {"--a": "1"}, "autoscaler": {"minReplicas": 1}});

        assert_eq!(
            merge_patch(&before, &after),
            json!({"args": {"--b": null}, "autoscaler": {"minReplicas": 1}})
        );
    }

    #[test]
    fn test_spec_patch_none_when_unchanged() {
        let collector = OpenTelemetryCollector::new("otel", CollectorSpec::default());
        assert!(spec_patch(&collector, &collector.clone()).unwrap().is_none());
    }

    #[test]
    fn test_spec_patch_carries_resource_version() {
        let mut original = OpenTelemetryCollector::new("otel", CollectorSpec::default());
        original.metadata.resource_version = Some("42".to_string());
        let mut upgraded = original.clone();
        upgraded.spec.config = "receivers: {}\n".to_string();

        let patch = spec_patch(&original, &upgraded).unwrap().unwrap();

        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["spec"], json!({"config": "receivers: {}\n"}));
    }

    #[test]
    fn test_selector_matching() {
        let labels = [
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]
        .into_iter()
        .collect();

        assert!(selector_matches(&labels, "a=1,b=2"));
        assert!(selector_matches(&labels, "a=1"));
        assert!(!selector_matches(&labels, "a=1,c=3"));
    }

    #[test]
    fn test_managed_selector() {
        assert_eq!(
            managed_selector(),
            "app.kubernetes.io/managed-by=opentelemetry-operator"
        );
    }
}
