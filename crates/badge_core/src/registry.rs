use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::{error::BadgeError, record::UpdateMessage};

/// Receives badge count changes. Implementations run on the event context
/// and must hand heavy work off elsewhere.
///
/// [`NotificationService`](crate::NotificationService) invokes observers while
/// holding its internal lock. Calling back into the same service from
/// `on_count_changed` (subscribing, unsubscribing, reading counts, feeding
/// events) deadlocks; queue the work and perform it after returning.
pub trait CountObserver: Send + Sync {
    fn on_count_changed(&self, source_id: &str, count: usize) -> anyhow::Result<()>;
}

impl<F> CountObserver for F
where
    F: Fn(&str, usize) -> anyhow::Result<()> + Send + Sync,
{
    fn on_count_changed(&self, source_id: &str, count: usize) -> anyhow::Result<()> {
        self(source_id, count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    observer: Arc<dyn CountObserver>,
}

/// Observers in registration order.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn CountObserver>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscriptions.push(Subscription { id, observer });
        tracing::debug!(%id, observers = self.subscriptions.len(), "observer subscribed");
        id
    }

    /// Returns `false` when `id` was never registered or is already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|subscription| subscription.id != id);
        let removed = self.subscriptions.len() != before;
        if removed {
            tracing::debug!(%id, "observer unsubscribed");
        }
        removed
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.iter().any(|subscription| subscription.id == id)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Delivers `message` to every observer and returns the failures.
    pub fn publish(&self, message: &UpdateMessage) -> Vec<BadgeError> {
        self.subscriptions
            .iter()
            .filter_map(|subscription| deliver(subscription, message).err())
            .collect()
    }

    /// Delivers `messages` to a single observer, used for late-join snapshots.
    pub fn deliver_to(&self, id: SubscriptionId, messages: &[UpdateMessage]) -> Vec<BadgeError> {
        let Some(subscription) = self.subscriptions.iter().find(|s| s.id == id) else {
            return Vec::new();
        };
        messages
            .iter()
            .filter_map(|message| deliver(subscription, message).err())
            .collect()
    }
}

fn deliver(subscription: &Subscription, message: &UpdateMessage) -> Result<(), BadgeError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        subscription
            .observer
            .on_count_changed(&message.source_id, message.count)
    }))
    .unwrap_or_else(|payload| {
        Err(anyhow!(
            "observer panicked: {}",
            panic_message(payload.as_ref())
        ))
    });

    outcome.map_err(|err| {
        tracing::warn!(
            id = %subscription.id,
            source_id = %message.source_id,
            count = message.count,
            err = format!("{err:#}"),
            "observer failed to handle count change"
        );
        BadgeError::ObserverFailed {
            id: subscription.id,
            message: format!("{err:#}"),
        }
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
