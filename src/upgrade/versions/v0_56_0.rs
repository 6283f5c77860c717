use crate::crd::OpenTelemetryCollector;
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

/// Autoscaling requires a lower bound: default `minReplicas` from `replicas`
pub struct DefaultMinReplicas;

#[async_trait]
impl Transform for DefaultMinReplicas {
    fn name(&self) -> &'static str {
        "default-min-replicas"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let spec = &mut collector.spec;
        if spec.max_replicas.is_some() && spec.min_replicas.is_none() {
            let min = spec.replicas.unwrap_or(1);
            spec.min_replicas = Some(min);
            ctx.record_change(format!("set 'minReplicas' to {min}"));
        }
        Ok(collector)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::upgrade::versions::testing::collector;

    #[tokio::test]
    async fn test_min_replicas_defaults_to_replicas() {
        let (ctx, _, _) = UpgradeContext::new_mock("0.56.0");
        let mut instance = collector("");
        instance.spec.replicas = Some(3);
        instance.spec.max_replicas = Some(10);

        let upgraded = DefaultMinReplicas.apply(&ctx, instance).await.unwrap();

        assert_eq!(upgraded.spec.min_replicas, Some(3));
    }

    #[tokio::test]
    async fn test_min_replicas_defaults_to_one() {
        let (ctx, _, _) = UpgradeContext::new_mock("0.56.0");
        let mut instance = collector("");
        instance.spec.max_replicas = Some(10);

        let upgraded = DefaultMinReplicas.apply(&ctx, instance).await.unwrap();

        assert_eq!(upgraded.spec.min_replicas, Some(1));
    }

    #[tokio::test]
    async fn test_explicit_min_or_no_max_is_untouched() {
        let (ctx, _, _) = UpgradeContext::new_mock("0.56.0");
        let mut explicit = collector("");
        explicit.spec.max_replicas = Some(10);
        explicit.spec.min_replicas = Some(2);
        let no_autoscaling = collector("");

        for instance in [explicit, no_autoscaling] {
            let upgraded = DefaultMinReplicas.apply(&ctx, instance.clone()).await.unwrap();
            assert_eq!(upgraded, instance);
        }
        assert!(ctx.changes().is_empty());
    }
}
