use super::{components_mut, edit_config};
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::config_tree::{ConfigNode, Mapping};
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// The resource processor replaced its `labels` map with a list of attribute actions
pub struct ResourceLabelsToAttributes;

#[async_trait]
impl Transform for ResourceLabelsToAttributes {
    fn name(&self) -> &'static str {
        "resource-labels-to-attributes"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let notes = edit_config(&mut collector, |tree| {
            let mut notes = Vec::new();
            for (id, processor) in components_mut(tree, "processors", "resource") {
                if labels_to_attributes(processor) {
                    notes.push(format!(
                        "moved 'labels' to 'attributes' with action 'upsert' in processor '{id}'"
                    ));
                }
            }
            Ok(notes)
        })?;

        ctx.record_changes(notes);
        Ok(collector)
    }
}

fn labels_to_attributes(processor: &mut ConfigNode) -> bool {
    let Some(map) = processor.as_mapping_mut() else {
        return false;
    };
    if !matches!(map.get("labels"), Some(ConfigNode::Mapping(_))) {
        return false;
    }
    if !matches!(
        map.get("attributes"),
        None | Some(ConfigNode::Null) | Some(ConfigNode::Sequence(_))
    ) {
        return false;
    }
    let Some(ConfigNode::Mapping(labels)) = map.remove("labels") else {
        return false;
    };

    let attributes = map
        .entry("attributes".to_string())
        .or_insert(ConfigNode::Null);
    if attributes.is_null() {
        *attributes = ConfigNode::Sequence(Vec::new());
    }
    let Some(items) = attributes.as_sequence_mut() else {
        return false;
    };

    let existing: BTreeSet<String> = items
        .iter()
        .filter_map(|item| item.get("key").and_then(ConfigNode::scalar_text))
        .collect();
    for (key, value) in labels {
        if existing.contains(&key) {
            continue;
        }
        items.push(ConfigNode::Mapping(Mapping::from([
            ("action".to_string(), ConfigNode::from("upsert")),
            ("key".to_string(), ConfigNode::from(key)),
            ("value".to_string(), value),
        ])));
    }
    true
}
