use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    aggregator::{Aggregator, ConnectionState, TableUpdate},
    dispatcher::SourceEvent,
    error::{BadgeError, SourceError},
    publisher::{ChangePublisher, PublishReport},
    record::NotificationRecord,
    registry::{CountObserver, SubscriptionId},
    source::{BoundedSource, NotificationSource},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub events_processed: u64,
    pub events_dropped: u64,
    pub query_failures: u64,
    pub malformed_records: u64,
    pub messages_published: u64,
    pub observer_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub state: ConnectionState,
    pub connected_at: Option<DateTime<Utc>>,
    pub sources: usize,
    pub total: usize,
    pub observers: usize,
    pub stats: PipelineStats,
}

struct Inner<S> {
    aggregator: Aggregator<S>,
    publisher: ChangePublisher,
    stats: PipelineStats,
}

impl<S: NotificationSource> Inner<S> {
    fn record_report(&mut self, report: PublishReport) {
        self.stats.messages_published += report.messages as u64;
        self.stats.observer_failures += report.failures.len() as u64;
    }

    fn record_failure(&mut self, err: &BadgeError, event: &'static str) {
        match err {
            BadgeError::Source(SourceError::NotConnected) => {
                self.stats.events_dropped += 1;
                tracing::debug!(event, "dropping event while disconnected");
            }
            BadgeError::Source(source_err) => {
                self.stats.query_failures += 1;
                tracing::warn!(event, err = %source_err, "active query failed, keeping last known counts");
            }
            BadgeError::MalformedRecord(record_err) => {
                self.stats.malformed_records += 1;
                tracing::warn!(event, err = %record_err, "skipping malformed notification event");
            }
            other => tracing::warn!(event, err = %other, "notification event failed"),
        }
    }

    fn finish_change(
        &mut self,
        outcome: Result<Option<TableUpdate>, BadgeError>,
        event: &'static str,
    ) {
        self.stats.events_processed += 1;
        match outcome {
            Ok(Some(TableUpdate::Count(change))) => {
                let report = self.publisher.publish_change(&change);
                self.record_report(report);
            }
            Ok(Some(TableUpdate::Rebuilt(resync))) => {
                tracing::info!(event, "completed resync owed by a failed reconnect");
                let report = self.publisher.publish_resync(&resync);
                self.record_report(report);
            }
            Ok(None) => {}
            Err(err) => self.record_failure(&err, event),
        }
    }
}

/// Process-scoped badge count service.
///
/// Construct one per notification listener session and hand out `Arc`s to
/// whatever needs it. Every operation takes the same lock for the whole
/// query, update and publish sequence, so observers and readers never see a
/// count that has not been published yet. Observers are called with that lock
/// held and must not call back into the service.
pub struct NotificationService<S> {
    inner: Mutex<Inner<S>>,
}

pub struct NotificationServiceBuilder {
    source: Option<Box<dyn NotificationSource>>,
    observers: Vec<Arc<dyn CountObserver>>,
    query_timeout: Option<Duration>,
}

impl NotificationServiceBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            observers: Vec::new(),
            query_timeout: None,
        }
    }

    pub fn with_source(mut self, source: impl NotificationSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn add_observer(mut self, observer: Arc<dyn CountObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Bounds each active-set query; a slow query becomes a transient failure.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<NotificationService<Box<dyn NotificationSource>>> {
        let source = self
            .source
            .ok_or_else(|| anyhow!("notification service needs a notification source"))?;
        let source: Box<dyn NotificationSource> = match self.query_timeout {
            Some(timeout) if !timeout.is_zero() => Box::new(
                BoundedSource::new(source, timeout).context("failed to start query worker")?,
            ),
            _ => source,
        };
        let service = NotificationService::new(source);
        for observer in self.observers {
            service.subscribe(observer);
        }
        Ok(service)
    }
}

impl Default for NotificationServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationService<Box<dyn NotificationSource>> {
    pub fn builder() -> NotificationServiceBuilder {
        NotificationServiceBuilder::new()
    }
}

impl<S: NotificationSource> NotificationService<S> {
    pub fn new(source: S) -> Self {
        Self {
            inner: Mutex::new(Inner {
                aggregator: Aggregator::new(source),
                publisher: ChangePublisher::default(),
                stats: PipelineStats::default(),
            }),
        }
    }

    pub fn connected(&self) {
        let mut inner = self.inner.lock();
        inner.stats.events_processed += 1;
        match inner.aggregator.on_connected() {
            Ok(resync) => {
                let report = inner.publisher.publish_resync(&resync);
                inner.record_report(report);
            }
            Err(err) => inner.record_failure(&err, "connected"),
        }
    }

    pub fn disconnected(&self) {
        let mut inner = self.inner.lock();
        inner.stats.events_processed += 1;
        inner.aggregator.on_disconnected();
    }

    pub fn posted(&self, record: &NotificationRecord) {
        let mut inner = self.inner.lock();
        let outcome = inner.aggregator.on_posted(record);
        inner.finish_change(outcome, "posted");
    }

    pub fn removed(&self, record: &NotificationRecord) {
        let mut inner = self.inner.lock();
        let outcome = inner.aggregator.on_removed(record);
        inner.finish_change(outcome, "removed");
    }

    pub fn apply(&self, event: SourceEvent) {
        match event {
            SourceEvent::Connected => self.connected(),
            SourceEvent::Disconnected => self.disconnected(),
            SourceEvent::Posted(record) => self.posted(&record),
            SourceEvent::Removed(record) => self.removed(&record),
        }
    }

    /// Registers `observer` and immediately replays the current non-zero
    /// counts to it, so it converges without waiting for the next event.
    pub fn subscribe(&self, observer: Arc<dyn CountObserver>) -> SubscriptionId {
        let mut inner = self.inner.lock();
        let id = inner.publisher.registry_mut().subscribe(observer);
        let snapshot = inner.aggregator.table().snapshot();
        let failures = inner.publisher.registry().deliver_to(id, &snapshot);
        inner.stats.observer_failures += failures.len() as u64;
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.lock().publisher.registry_mut().unsubscribe(id)
    }

    pub fn count(&self, source_id: &str) -> usize {
        self.inner.lock().aggregator.table().get(source_id)
    }

    pub fn snapshot(&self) -> BTreeMap<String, usize> {
        self.inner.lock().aggregator.table().to_map()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().aggregator.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.inner.lock().stats
    }

    pub fn status(&self) -> ServiceStatus {
        let inner = self.inner.lock();
        let table = inner.aggregator.table();
        ServiceStatus {
            state: inner.aggregator.state(),
            connected_at: inner.aggregator.connected_at(),
            sources: table.len(),
            total: table.total(),
            observers: inner.publisher.registry().len(),
            stats: inner.stats,
        }
    }
}
