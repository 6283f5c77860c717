use crate::crd::{OpenTelemetryCollector, INSTANCE_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::{CrossVersionObjectReference, HorizontalPodAutoscaler};
use kube::{Resource, ResourceExt};
use tracing::warn;

/// Generated autoscalers scale the collector resource instead of its Deployment
///
/// Only autoscalers labelled for this instance that still point at the generated
/// `apps/v1` Deployment are rewritten. Every match is attempted; failures are reported
/// together once all have been tried.
pub struct RetargetAutoscalers;

#[async_trait]
impl Transform for RetargetAutoscalers {
    fn name(&self) -> &'static str {
        "retarget-autoscalers"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let namespace = collector
            .namespace()
            .unwrap_or_else(|| "default".to_string());
        let selector = format!(
            "{}={},{}={}",
            MANAGED_BY_LABEL,
            MANAGED_BY_VALUE,
            INSTANCE_LABEL,
            collector.instance_label_value()
        );

        let autoscalers = ctx.autoscalers.list(&namespace, &selector).await?;

        let workload = collector.workload_name();
        let target = CrossVersionObjectReference {
            api_version: Some(OpenTelemetryCollector::api_version(&()).to_string()),
            kind: OpenTelemetryCollector::kind(&()).to_string(),
            name: collector.name_any(),
        };

        let mut notes = Vec::new();
        let mut failures = Vec::new();
        for hpa in autoscalers.iter().filter(|hpa| targets_workload(hpa, &workload)) {
            let name = hpa.name_any();
            match ctx.autoscalers.retarget(&namespace, &name, &target).await {
                Ok(()) => notes.push(format!(
                    "autoscaler '{name}' now targets {} '{}'",
                    target.kind, target.name
                )),
                Err(e) => {
                    warn!(autoscaler = %name, error = %e, "Failed to retarget autoscaler");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        ctx.record_changes(notes);

        if failures.is_empty() {
            Ok(collector)
        } else {
            Err(StepError::Rejected(format!(
                "failed to retarget {} autoscaler(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}

fn targets_workload(hpa: &HorizontalPodAutoscaler, workload: &str) -> bool {
    hpa.spec.as_ref().is_some_and(|spec| {
        let target = &spec.scale_target_ref;
        target.kind == "Deployment"
            && target.name == workload
            && target.api_version.as_deref().unwrap_or("apps/v1") == "apps/v1"
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::upgrade::versions::testing::collector;
    use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscalerSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn hpa(name: &str, instance: &str, kind: &str, target: &str) -> HorizontalPodAutoscaler {
        HorizontalPodAutoscaler {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("observability".to_string()),
                labels: Some(
                    [
                        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
                        (INSTANCE_LABEL.to_string(), instance.to_string()),
                    ]
                    .into_iter()
                    .collect(),
                ),
                ..ObjectMeta::default()
            },
            spec: Some(HorizontalPodAutoscalerSpec {
                max_replicas: 5,
                scale_target_ref: CrossVersionObjectReference {
                    api_version: Some("apps/v1".to_string()),
                    kind: kind.to_string(),
                    name: target.to_string(),
                },
                ..HorizontalPodAutoscalerSpec::default()
            }),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_matching_autoscaler_is_retargeted() {
        let (ctx, _, autoscalers) = UpgradeContext::new_mock("0.89.0");
        autoscalers.insert(hpa("otel-collector", "observability.otel", "Deployment", "otel-collector"));
        // Belongs to another instance
        autoscalers.insert(hpa("other-collector", "observability.other", "Deployment", "other-collector"));
        // Already retargeted
        autoscalers.insert(hpa("otel-done", "observability.otel", "OpenTelemetryCollector", "otel"));

        RetargetAutoscalers.apply(&ctx, collector("")).await.unwrap();

        let retargeted = autoscalers.retargeted();
        assert_eq!(retargeted.len(), 1);
        let (namespace, name, target) = &retargeted[0];
        assert_eq!(namespace, "observability");
        assert_eq!(name, "otel-collector");
        assert_eq!(target.kind, "OpenTelemetryCollector");
        assert_eq!(target.name, "otel");
        assert_eq!(target.api_version.as_deref(), Some("opentelemetry.io/v1alpha1"));
        assert_eq!(ctx.changes().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_matches_is_a_no_op() {
        let (ctx, _, autoscalers) = UpgradeContext::new_mock("0.89.0");
        let instance = collector("");

        let upgraded = RetargetAutoscalers.apply(&ctx, instance.clone()).await.unwrap();

        assert_eq!(upgraded, instance);
        assert!(autoscalers.retargeted().is_empty());
        assert!(ctx.changes().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_aggregated_after_trying_every_match() {
        let (ctx, _, autoscalers) = UpgradeContext::new_mock("0.89.0");
        autoscalers.insert(hpa("a", "observability.otel", "Deployment", "otel-collector"));
        autoscalers.insert(hpa("b", "observability.otel", "Deployment", "otel-collector"));
        autoscalers.insert(hpa("c", "observability.otel", "Deployment", "otel-collector"));
        autoscalers.fail_retarget("a");
        autoscalers.fail_retarget("c");

        let err = RetargetAutoscalers.apply(&ctx, collector("")).await.unwrap_err();

        let StepError::Rejected(reason) = err else {
            panic!("expected a rejected step");
        };
        assert!(reason.starts_with("failed to retarget 2 autoscaler(s)"));
        assert!(reason.contains("a: "));
        assert!(reason.contains("c: "));
        // The healthy one was still patched
        assert_eq!(autoscalers.retargeted().len(), 1);
        assert_eq!(autoscalers.retargeted()[0].1, "b");
    }
}
