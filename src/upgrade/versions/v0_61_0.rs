use super::component_type;
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::config_tree::{self, ConfigNode};
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

/// The jaeger receiver dropped `remote_sampling`
///
/// Dropping it silently would change sampling decisions without telling anyone, so the
/// upgrade is refused until the user removes it.
pub struct RejectJaegerRemoteSampling;

#[async_trait]
impl Transform for RejectJaegerRemoteSampling {
    fn name(&self) -> &'static str {
        "reject-jaeger-remote-sampling"
    }

    async fn apply(
        &self,
        _ctx: &UpgradeContext,
        collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let (tree, _) = config_tree::parse_document(&collector.spec.config)?;

        let offending = tree
            .get("receivers")
            .and_then(ConfigNode::as_mapping)
            .and_then(|receivers| {
                receivers
                    .iter()
                    .find(|(id, receiver)| {
                        component_type(id) == "jaeger" && receiver.has_path(&["remote_sampling"])
                    })
                    .map(|(id, _)| id.clone())
            });

        match offending {
            Some(id) => Err(StepError::Rejected(format!(
                "receiver '{id}' uses 'remote_sampling', which is no longer supported; \
                 remove it or use the jaegerremotesampling extension instead"
            ))),
            None => Ok(collector),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::upgrade::versions::testing::collector;

    #[tokio::test]
    async fn test_remote_sampling_is_refused() {
        let (ctx, _, _) = UpgradeContext::new_mock("0.61.0");
        let instance = collector(
            r#"
receivers:
  jaeger/custom:
    protocols:
      grpc: {}
    remote_sampling:
      strategy_file: /etc/strategy.json
"#,
        );

        let err = RejectJaegerRemoteSampling
            .apply(&ctx, instance)
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Rejected(ref reason) if reason.contains("jaeger/custom")));
    }

    #[tokio::test]
    async fn test_plain_jaeger_receiver_passes() {
        let (ctx, _, _) = UpgradeContext::new_mock("0.61.0");
        let instance = collector("receivers:\n  jaeger:\n    protocols:\n      grpc: {}\n");

        let upgraded = RejectJaegerRemoteSampling
            .apply(&ctx, instance.clone())
            .await
            .unwrap();

        assert_eq!(upgraded, instance);
    }

    #[tokio::test]
    async fn test_flow_mapping_config_is_inspected() {
        let (ctx, _, _) = UpgradeContext::new_mock("0.61.0");
        let instance = collector("{receivers: {jaeger: {remote_sampling: {host_endpoint: ':5778'}}}}");

        let err = RejectJaegerRemoteSampling
            .apply(&ctx, instance)
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_invalid_config_is_a_codec_error() {
        let (ctx, _, _) = UpgradeContext::new_mock("0.61.0");
        let instance = collector("receivers: [jaeger");

        let err = RejectJaegerRemoteSampling
            .apply(&ctx, instance)
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Config(_)));
    }
}
