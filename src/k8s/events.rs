//! Outcome events recorded against a pet's owning StatefulSet.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, PostParams};
use kube::client::Client;
use tokio::time::timeout;

use crate::config::Config;
use crate::error::SyncError;
use crate::pet::client::EventRecorder;

/// The event type of a successful outcome.
const EVENT_TYPE_NORMAL: &str = "Normal";
/// The event type of a failed outcome.
const EVENT_TYPE_WARNING: &str = "Warning";

/// An event recorder which publishes K8s `Event`s against the owning StatefulSet.
///
/// Events are created on a detached task so that callers are never blocked. Failures to publish
/// are logged & dropped.
pub struct K8sEventRecorder {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
}

impl K8sEventRecorder {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>) -> Self {
        Self { client, config }
    }
}

/// Build the event for the given outcome.
pub(super) fn build_event(component: &str, parent: &StatefulSet, kind: &str, message: &str, err: Option<&SyncError>) -> Event {
    let (type_, reason, message) = match err {
        Some(err) => (EVENT_TYPE_WARNING, format!("Failed{}", kind), format!("{}, error: {:#}", message, err)),
        None => (EVENT_TYPE_NORMAL, format!("Successful{}", kind), message.to_string()),
    };
    let parent_name = parent.metadata.name.clone().unwrap_or_default();
    let now = Time(chrono::Utc::now());
    Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}.", parent_name)),
            namespace: parent.metadata.namespace.clone(),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some("apps/v1".into()),
            kind: Some("StatefulSet".into()),
            name: Some(parent_name),
            namespace: parent.metadata.namespace.clone(),
            uid: parent.metadata.uid.clone(),
            resource_version: parent.metadata.resource_version.clone(),
            ..Default::default()
        },
        reason: Some(reason),
        message: Some(message),
        type_: Some(type_.into()),
        count: Some(1),
        first_timestamp: Some(now.clone()),
        last_timestamp: Some(now),
        source: Some(EventSource {
            component: Some(component.into()),
            host: None,
        }),
        reporting_component: Some(component.into()),
        ..Default::default()
    }
}

impl EventRecorder for K8sEventRecorder {
    fn record(&self, parent: &StatefulSet, kind: &str, message: &str, err: Option<&SyncError>) {
        let event = build_event(&self.config.event_component, parent, kind, message, err);
        let namespace = event.metadata.namespace.clone().unwrap_or_else(|| self.config.namespace.clone());
        let api: Api<Event> = Api::namespaced(self.client.clone(), &namespace);
        let api_timeout: Duration = self.config.api_timeout();
        tokio::spawn(async move {
            match timeout(api_timeout, api.create(&PostParams::default(), &event)).await {
                Ok(Ok(_)) => (),
                Ok(Err(err)) => tracing::warn!(error = ?err, reason = ?event.reason, "error recording event"),
                Err(_) => tracing::warn!(reason = ?event.reason, "timeout while recording event"),
            }
        });
    }
}
