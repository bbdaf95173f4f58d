use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{BadgeError, SourceError},
    record::NotificationRecord,
    source::NotificationSource,
    table::{self, ActiveCountTable},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// A single source whose authoritative count moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountChange {
    pub source_id: String,
    pub previous: usize,
    pub current: usize,
}

/// Outcome of a full rebuild: the table before and after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resync {
    pub previous: ActiveCountTable,
    pub current: ActiveCountTable,
}

impl Resync {
    /// Sources that were showing a badge before the rebuild and no longer are.
    pub fn cleared(&self) -> impl Iterator<Item = &str> + '_ {
        self.previous
            .sources()
            .filter(|source_id| !self.current.contains(source_id))
    }
}

/// What a posted or removed event did to the table. `Rebuilt` only appears
/// when a reconnect failed to rebuild and the event had to finish the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableUpdate {
    Count(CountChange),
    Rebuilt(Resync),
}

/// Owns the [`ActiveCountTable`] and keeps it in step with the source.
///
/// Counts are never adjusted by +1/-1 from the event payload. Every event
/// triggers a recount against `query_active`, because the platform may
/// deliver the same event twice, deliver events out of order, or coalesce
/// removals of a group's children into nothing at all. An incremental counter
/// drifts under any of those; a recount converges.
pub struct Aggregator<S> {
    source: S,
    table: ActiveCountTable,
    state: ConnectionState,
    connected_at: Option<DateTime<Utc>>,
    resync_pending: bool,
}

impl<S: NotificationSource> Aggregator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            table: ActiveCountTable::new(),
            state: ConnectionState::Disconnected,
            connected_at: None,
            resync_pending: false,
        }
    }

    pub fn table(&self) -> &ActiveCountTable {
        &self.table
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    /// True while a full rebuild is owed because the last one failed.
    pub fn resync_pending(&self) -> bool {
        self.resync_pending
    }

    /// The source granted a live session. Rebuilds the table from scratch,
    /// including on reconnects, since events may have been missed meanwhile.
    ///
    /// On a failed query the session still counts as connected, the table
    /// keeps its last known-good contents, and the next event performs the
    /// full rebuild instead of a single-source recount.
    pub fn on_connected(&mut self) -> Result<Resync, BadgeError> {
        self.state = ConnectionState::Connected;
        self.connected_at = Some(Utc::now());
        self.resync_pending = true;
        self.rebuild()
    }

    fn rebuild(&mut self) -> Result<Resync, BadgeError> {
        let records = self.source.query_active()?;
        let current = ActiveCountTable::from_records(&records);
        let previous = std::mem::replace(&mut self.table, current.clone());
        self.resync_pending = false;
        tracing::info!(
            sources = current.len(),
            total = current.total(),
            "rebuilt active notification counts"
        );
        Ok(Resync { previous, current })
    }

    pub fn on_disconnected(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Disconnected;
        tracing::info!(
            sources = self.table.len(),
            "notification source disconnected, keeping last known counts"
        );
    }

    pub fn on_posted(
        &mut self,
        record: &NotificationRecord,
    ) -> Result<Option<TableUpdate>, BadgeError> {
        let source_id = record.validate()?;
        self.ensure_connected()?;
        if self.resync_pending {
            return self.rebuild().map(|resync| Some(TableUpdate::Rebuilt(resync)));
        }
        if record.is_group_summary() {
            tracing::trace!(source_id, "ignoring posted group summary");
            return Ok(None);
        }
        self.recount(source_id)
    }

    /// Removals always recount, even for summaries: dismissing a group summary
    /// can take its children with it.
    pub fn on_removed(
        &mut self,
        record: &NotificationRecord,
    ) -> Result<Option<TableUpdate>, BadgeError> {
        let source_id = record.validate()?;
        self.ensure_connected()?;
        if self.resync_pending {
            return self.rebuild().map(|resync| Some(TableUpdate::Rebuilt(resync)));
        }
        self.recount(source_id)
    }

    fn ensure_connected(&self) -> Result<(), BadgeError> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => Err(SourceError::NotConnected.into()),
        }
    }

    fn recount(&mut self, source_id: &str) -> Result<Option<TableUpdate>, BadgeError> {
        let records = self.source.query_active()?;
        let current = table::count_for(&records, source_id);
        let previous = self.table.get(source_id);
        if current == previous {
            tracing::trace!(source_id, count = current, "count unchanged");
            return Ok(None);
        }
        self.table.set(source_id, current);
        Ok(Some(TableUpdate::Count(CountChange {
            source_id: source_id.to_string(),
            previous,
            current,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeSource {
        active: Mutex<Vec<NotificationRecord>>,
        failing: Mutex<bool>,
    }

    impl FakeSource {
        fn set(&self, records: Vec<NotificationRecord>) {
            *self.active.lock() = records;
        }
    }

    impl NotificationSource for FakeSource {
        fn query_active(&self) -> Result<Vec<NotificationRecord>, SourceError> {
            if *self.failing.lock() {
                return Err(SourceError::Unavailable("binder dead".into()));
            }
            Ok(self.active.lock().clone())
        }
    }

    fn connected(
        records: Vec<NotificationRecord>,
    ) -> (Arc<FakeSource>, Aggregator<Arc<FakeSource>>) {
        let source = Arc::new(FakeSource::default());
        source.set(records);
        let mut aggregator = Aggregator::new(Arc::clone(&source));
        aggregator.on_connected().unwrap();
        (source, aggregator)
    }

    fn count_change(update: Option<TableUpdate>) -> CountChange {
        match update {
            Some(TableUpdate::Count(change)) => change,
            other => panic!("expected a count change, got {other:?}"),
        }
    }

    #[test]
    fn posting_recounts_from_the_active_set() {
        let (source, mut aggregator) = connected(vec![]);
        let record = NotificationRecord::child("com.mail");
        source.set(vec![record.clone(), record.clone()]);

        let change = count_change(aggregator.on_posted(&record).unwrap());
        assert_eq!(change.previous, 0);
        assert_eq!(change.current, 2);
        assert_eq!(aggregator.table().get("com.mail"), 2);
    }

    #[test]
    fn duplicate_post_is_a_no_op() {
        let (source, mut aggregator) = connected(vec![]);
        let record = NotificationRecord::child("com.mail");
        source.set(vec![record.clone()]);

        assert!(aggregator.on_posted(&record).unwrap().is_some());
        assert!(aggregator.on_posted(&record).unwrap().is_none());
    }

    #[test]
    fn posted_summary_is_ignored() {
        let (source, mut aggregator) = connected(vec![]);
        let summary = NotificationRecord::summary("com.chat");
        source.set(vec![summary.clone()]);

        assert!(aggregator.on_posted(&summary).unwrap().is_none());
        assert!(!aggregator.table().contains("com.chat"));
    }

    #[test]
    fn removing_a_summary_still_recounts_children() {
        let (source, mut aggregator) = connected(vec![
            NotificationRecord::summary("com.chat"),
            NotificationRecord::child("com.chat"),
            NotificationRecord::child("com.chat"),
        ]);
        assert_eq!(aggregator.table().get("com.chat"), 2);

        source.set(vec![]);
        let change = count_change(
            aggregator
                .on_removed(&NotificationRecord::summary("com.chat"))
                .unwrap(),
        );
        assert_eq!((change.previous, change.current), (2, 0));
        assert!(!aggregator.table().contains("com.chat"));
    }

    #[test]
    fn failed_query_keeps_last_known_counts() {
        let (source, mut aggregator) = connected(vec![NotificationRecord::child("com.mail")]);
        *source.failing.lock() = true;

        let err = aggregator
            .on_removed(&NotificationRecord::child("com.mail"))
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(aggregator.table().get("com.mail"), 1);

        assert!(aggregator.on_connected().is_err());
        assert_eq!(aggregator.state(), ConnectionState::Connected);
        assert_eq!(aggregator.table().get("com.mail"), 1);
        assert!(aggregator.resync_pending());
    }

    #[test]
    fn failed_reconnect_rebuilds_on_the_next_event() {
        let (source, mut aggregator) = connected(vec![
            NotificationRecord::child("a"),
            NotificationRecord::child("a"),
        ]);
        aggregator.on_disconnected();
        source.set(vec![NotificationRecord::child("b")]);
        *source.failing.lock() = true;
        assert!(aggregator.on_connected().is_err());

        *source.failing.lock() = false;
        let update = aggregator
            .on_posted(&NotificationRecord::summary("c"))
            .unwrap();
        let Some(TableUpdate::Rebuilt(resync)) = update else {
            panic!("expected a full rebuild, got {update:?}");
        };
        assert_eq!(resync.cleared().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(aggregator.table().get("b"), 1);
        assert!(!aggregator.resync_pending());

        let follow_up = aggregator.on_posted(&NotificationRecord::child("b")).unwrap();
        assert!(follow_up.is_none());
    }

    #[test]
    fn malformed_event_is_rejected() {
        let (_source, mut aggregator) = connected(vec![]);
        let err = aggregator.on_posted(&NotificationRecord::child("")).unwrap_err();
        assert!(matches!(err, BadgeError::MalformedRecord(_)));
    }

    #[test]
    fn reconnect_rebuilds_and_reports_cleared_sources() {
        let (source, mut aggregator) = connected(vec![
            NotificationRecord::child("a"),
            NotificationRecord::child("a"),
            NotificationRecord::child("a"),
        ]);
        aggregator.on_disconnected();
        source.set(vec![NotificationRecord::child("b")]);

        let resync = aggregator.on_connected().unwrap();
        assert_eq!(resync.cleared().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(resync.current.get("b"), 1);
        assert_eq!(aggregator.table().to_map().len(), 1);
    }

    #[test]
    fn events_while_disconnected_are_refused() {
        let source = Arc::new(FakeSource::default());
        source.set(vec![NotificationRecord::child("com.mail")]);
        let mut aggregator = Aggregator::new(Arc::clone(&source));

        let err = aggregator
            .on_posted(&NotificationRecord::child("com.mail"))
            .unwrap_err();
        assert!(matches!(err, BadgeError::Source(SourceError::NotConnected)));
        assert!(aggregator.table().is_empty());

        let err = aggregator
            .on_posted(&NotificationRecord::summary("com.mail"))
            .unwrap_err();
        assert!(matches!(err, BadgeError::Source(SourceError::NotConnected)));
    }
}
