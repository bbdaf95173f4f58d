pub mod aggregator;
pub mod dispatcher;
pub mod error;
pub mod publisher;
pub mod record;
pub mod registry;
pub mod service;
pub mod source;
pub mod table;

pub use crate::aggregator::{ConnectionState, TableUpdate};
pub use crate::dispatcher::{EventDispatcher, EventSender, SourceEvent};
pub use crate::error::{BadgeError, RecordError, SourceError};
pub use crate::record::{NotificationRecord, UpdateMessage};
pub use crate::registry::{CountObserver, SubscriptionId};
pub use crate::service::{NotificationService, NotificationServiceBuilder};
pub use crate::source::{BoundedSource, NotificationSource};
