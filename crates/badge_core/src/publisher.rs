use crate::{
    aggregator::{CountChange, Resync},
    error::BadgeError,
    record::UpdateMessage,
    registry::SubscriberRegistry,
};

/// What a publish attempt did.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub messages: usize,
    pub failures: Vec<BadgeError>,
}

impl PublishReport {
    fn absorb(&mut self, failures: Vec<BadgeError>) {
        self.messages += 1;
        self.failures.extend(failures);
    }
}

/// Turns aggregator deltas into [`UpdateMessage`]s and fans them out.
///
/// Messages go out synchronously in the order the aggregator produced them.
/// Nothing is batched or reordered across events.
#[derive(Default)]
pub struct ChangePublisher {
    registry: SubscriberRegistry,
}

impl ChangePublisher {
    pub fn new(registry: SubscriberRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SubscriberRegistry {
        &mut self.registry
    }

    pub fn publish_change(&self, change: &CountChange) -> PublishReport {
        let mut report = PublishReport::default();
        if change.previous == change.current {
            return report;
        }
        let message = UpdateMessage::new(change.source_id.as_str(), change.current);
        tracing::debug!(
            source_id = %message.source_id,
            previous = change.previous,
            count = message.count,
            "publishing count change"
        );
        report.absorb(self.registry.publish(&message));
        report
    }

    /// Full snapshot of the rebuilt table, then a `0` for each source that
    /// vanished during the rebuild.
    pub fn publish_resync(&self, resync: &Resync) -> PublishReport {
        let mut report = PublishReport::default();
        let cleared = resync
            .cleared()
            .map(|source_id| UpdateMessage::new(source_id, 0));
        for message in resync.current.snapshot().into_iter().chain(cleared) {
            report.absorb(self.registry.publish(&message));
        }
        tracing::debug!(messages = report.messages, "published resync snapshot");
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::{record::NotificationRecord, table::ActiveCountTable};

    fn publisher_with_log() -> (ChangePublisher, Arc<Mutex<Vec<UpdateMessage>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let mut registry = SubscriberRegistry::new();
        registry.subscribe(Arc::new(
            move |source_id: &str, count: usize| -> anyhow::Result<()> {
                sink.lock().push(UpdateMessage::new(source_id, count));
                Ok(())
            },
        ));
        (ChangePublisher::new(registry), log)
    }

    #[test]
    fn unchanged_count_is_suppressed() {
        let (publisher, log) = publisher_with_log();
        let report = publisher.publish_change(&CountChange {
            source_id: "com.mail".into(),
            previous: 2,
            current: 2,
        });
        assert_eq!(report.messages, 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn resync_sends_snapshot_then_clears() {
        let (publisher, log) = publisher_with_log();
        let previous = ActiveCountTable::from_records(&[
            NotificationRecord::child("a"),
            NotificationRecord::child("c"),
        ]);
        let current = ActiveCountTable::from_records(&[
            NotificationRecord::child("b"),
            NotificationRecord::child("c"),
            NotificationRecord::child("c"),
        ]);

        let report = publisher.publish_resync(&Resync { previous, current });
        assert_eq!(report.messages, 3);
        assert_eq!(
            *log.lock(),
            vec![
                UpdateMessage::new("b", 1),
                UpdateMessage::new("c", 2),
                UpdateMessage::new("a", 0),
            ]
        );
    }
}
