use std::time::Duration;

use thiserror::Error;

use crate::registry::SubscriptionId;

/// The active-set query could not be completed. Always transient.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("notification source unavailable: {0}")]
    Unavailable(String),
    #[error("active notification query timed out after {0:?}")]
    TimedOut(Duration),
    #[error("notification source is not connected")]
    NotConnected,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("notification record has no usable source identifier")]
    MissingSourceId,
}

#[derive(Debug, Error)]
pub enum BadgeError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("malformed notification record: {0}")]
    MalformedRecord(#[from] RecordError),
    #[error("observer {id} failed: {message}")]
    ObserverFailed { id: SubscriptionId, message: String },
    #[error("event dispatcher has shut down")]
    DispatcherClosed,
}

impl BadgeError {
    /// Transient errors clear up on a later query; the rest are tied to one
    /// record or one observer.
    pub fn is_transient(&self) -> bool {
        matches!(self, BadgeError::Source(_) | BadgeError::DispatcherClosed)
    }
}
