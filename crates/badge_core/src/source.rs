use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{RecvTimeoutError, Sender};

use crate::{error::SourceError, record::NotificationRecord, registry::panic_message};

/// Platform notification pipelines implement this to expose the set of
/// notifications that are currently showing.
pub trait NotificationSource: Send + Sync {
    fn query_active(&self) -> Result<Vec<NotificationRecord>, SourceError>;
}

impl<T: NotificationSource + ?Sized> NotificationSource for Arc<T> {
    fn query_active(&self) -> Result<Vec<NotificationRecord>, SourceError> {
        (**self).query_active()
    }
}

impl<T: NotificationSource + ?Sized> NotificationSource for Box<T> {
    fn query_active(&self) -> Result<Vec<NotificationRecord>, SourceError> {
        (**self).query_active()
    }
}

type QueryReply = Sender<Result<Vec<NotificationRecord>, SourceError>>;

/// Caps how long a single active-set query may take.
///
/// Queries run one at a time on a single long-lived worker thread. When the
/// deadline passes the caller gets [`SourceError::TimedOut`] and the worker is
/// left to finish; its result is discarded. Until it does, further queries
/// time out immediately instead of queueing behind it.
pub struct BoundedSource<S> {
    requests: Sender<QueryReply>,
    busy: Arc<AtomicBool>,
    timeout: Duration,
    _source: PhantomData<fn() -> S>,
}

impl<S: NotificationSource + 'static> BoundedSource<S> {
    pub fn new(inner: S, timeout: Duration) -> Result<Self> {
        let (requests, incoming) = crossbeam_channel::unbounded::<QueryReply>();
        let busy = Arc::new(AtomicBool::new(false));
        let worker_busy = Arc::clone(&busy);
        thread::Builder::new()
            .name("badge-active-query".into())
            .spawn(move || {
                for reply in incoming {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| inner.query_active()))
                        .unwrap_or_else(|payload| {
                            Err(SourceError::Unavailable(format!(
                                "active query panicked: {}",
                                panic_message(payload.as_ref())
                            )))
                        });
                    worker_busy.store(false, Ordering::Release);
                    if reply.send(result).is_err() {
                        tracing::debug!("discarding active query result that arrived after its deadline");
                    }
                }
            })
            .context("failed to spawn active query worker")?;

        Ok(Self {
            requests,
            busy,
            timeout,
            _source: PhantomData,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<S: NotificationSource + 'static> NotificationSource for BoundedSource<S> {
    fn query_active(&self) -> Result<Vec<NotificationRecord>, SourceError> {
        if self.busy.swap(true, Ordering::AcqRel) {
            tracing::debug!("previous active query still running");
            return Err(SourceError::TimedOut(self.timeout));
        }

        let (reply, response) = crossbeam_channel::bounded(1);
        if self.requests.send(reply).is_err() {
            self.busy.store(false, Ordering::Release);
            return Err(SourceError::Unavailable(
                "active query worker has exited".into(),
            ));
        }

        match response.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(SourceError::TimedOut(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(SourceError::Unavailable(
                "active query worker exited without a result".into(),
            )),
        }
    }
}
