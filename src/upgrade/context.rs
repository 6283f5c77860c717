//! Context shared by every routine of one upgrade pass

use super::cluster::AutoscalerStore;
use crate::crd::OpenTelemetryCollector;
use crate::server::SharedMetrics;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use semver::Version;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Event reason for successful migrations
pub const REASON_UPGRADE: &str = "Upgrade";

/// Event reason for failed migrations
pub const REASON_ERROR: &str = "Error";

/// Event action for everything the upgrade engine reports
pub const ACTION_UPGRADE: &str = "Upgrade";

/// Publishes Kubernetes Events
///
/// Fire-and-forget: a failed event is logged and never fails an upgrade.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Event publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `instance` identifies the reporting pod (usually `POD_NAME`)
    pub fn new(client: Client, controller: &str, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, reference).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Everything an upgrade routine may need besides the instance itself
///
/// One context serves a whole pass (a single instance or a fleet scan). The driver
/// derives a per-instance copy with [`for_instance`](Self::for_instance) so the changes
/// routines report stay with the instance they were made to.
pub struct UpgradeContext {
    /// Operand version of the running operator; instances are migrated up to it
    pub target_version: Version,
    pub events: Arc<dyn EventPublisher>,
    /// Cluster handle for routines that rewrite objects other than the instance
    pub autoscalers: Arc<dyn AutoscalerStore>,
    pub metrics: Option<SharedMetrics>,
    changes: Mutex<Vec<String>>,
}

impl UpgradeContext {
    pub fn new(
        target_version: Version,
        events: Arc<dyn EventPublisher>,
        autoscalers: Arc<dyn AutoscalerStore>,
        metrics: Option<SharedMetrics>,
    ) -> Self {
        Self {
            target_version,
            events,
            autoscalers,
            metrics,
            changes: Mutex::default(),
        }
    }

    /// Same target and handles, empty change log
    pub fn for_instance(&self) -> Self {
        Self::new(
            self.target_version.clone(),
            self.events.clone(),
            self.autoscalers.clone(),
            self.metrics.clone(),
        )
    }

    /// Note a change made by a routine
    ///
    /// Nothing is published here: the caller announces the changes once the upgraded
    /// instance has been written back.
    pub fn record_change(&self, note: impl Into<String>) {
        self.change_log().push(note.into());
    }

    pub fn record_changes(&self, notes: Vec<String>) {
        self.change_log().extend(notes);
    }

    /// Changes noted so far, in order
    pub fn changes(&self) -> Vec<String> {
        self.change_log().clone()
    }

    pub fn take_changes(&self) -> Vec<String> {
        std::mem::take(&mut *self.change_log())
    }

    fn change_log(&self) -> MutexGuard<'_, Vec<String>> {
        // A poisoned log still holds every note pushed before the panic
        self.changes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Announce a migration applied to `collector`
    pub async fn record_upgrade(&self, collector: &OpenTelemetryCollector, note: impl Into<String>) {
        self.events
            .publish(
                &collector.object_ref(&()),
                EventType::Normal,
                REASON_UPGRADE,
                ACTION_UPGRADE,
                Some(note.into()),
            )
            .await;
    }

    /// Announce every note in order
    pub async fn record_upgrades(&self, collector: &OpenTelemetryCollector, notes: Vec<String>) {
        for note in notes {
            self.record_upgrade(collector, note).await;
        }
    }

    /// Warn about a migration that could not be applied
    pub async fn record_failure(&self, collector: &OpenTelemetryCollector, note: impl Into<String>) {
        self.events
            .publish(
                &collector.object_ref(&()),
                EventType::Warning,
                REASON_ERROR,
                ACTION_UPGRADE,
                Some(note.into()),
            )
            .await;
    }
}

/// A published event, as seen by tests
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub object: String,
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

/// Event publisher that keeps events in memory
#[cfg(test)]
#[derive(Default)]
pub struct MockEventPublisher {
    events: std::sync::Mutex<Vec<RecordedEvent>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn notes(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.note).collect()
    }
}

#[cfg(test)]
#[async_trait]
#[allow(clippy::unwrap_used)]
impl EventPublisher for MockEventPublisher {
    async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            object: reference.name.clone().unwrap_or_default(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note: note.unwrap_or_default(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl UpgradeContext {
    /// Context over in-memory events and autoscalers
    pub fn new_mock(
        target_version: &str,
    ) -> (
        Self,
        Arc<MockEventPublisher>,
        Arc<super::cluster::MockAutoscalerStore>,
    ) {
        let events = Arc::new(MockEventPublisher::new());
        let autoscalers = Arc::new(super::cluster::MockAutoscalerStore::new());
        let ctx = Self::new(
            Version::parse(target_version).unwrap(),
            events.clone(),
            autoscalers.clone(),
            None,
        );
        (ctx, events, autoscalers)
    }
}
