use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};

use crate::{
    error::BadgeError, record::NotificationRecord, service::NotificationService,
    source::NotificationSource,
};

/// Raw callbacks from the platform notification listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Connected,
    Disconnected,
    Posted(NotificationRecord),
    Removed(NotificationRecord),
}

enum Command {
    Event(SourceEvent),
    Stop,
}

/// Cloneable handle for feeding platform callbacks into the dispatcher.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Command>,
}

impl EventSender {
    pub fn send(&self, event: SourceEvent) -> Result<(), BadgeError> {
        self.tx
            .send(Command::Event(event))
            .map_err(|_| BadgeError::DispatcherClosed)
    }

    pub fn connected(&self) -> Result<(), BadgeError> {
        self.send(SourceEvent::Connected)
    }

    pub fn disconnected(&self) -> Result<(), BadgeError> {
        self.send(SourceEvent::Disconnected)
    }

    pub fn posted(&self, record: NotificationRecord) -> Result<(), BadgeError> {
        self.send(SourceEvent::Posted(record))
    }

    pub fn removed(&self, record: NotificationRecord) -> Result<(), BadgeError> {
        self.send(SourceEvent::Removed(record))
    }
}

/// Serialises events from any number of platform threads onto one worker
/// thread, which is the only context that touches the service.
pub struct EventDispatcher {
    tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    pub fn spawn<S>(service: Arc<NotificationService<S>>) -> Result<Self>
    where
        S: NotificationSource + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name("badge-dispatcher".into())
            .spawn(move || run_worker(service, rx))
            .context("failed to spawn badge dispatcher thread")?;
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Processes everything queued so far, then stops the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.tx.send(Command::Stop);
        if worker.join().is_err() {
            tracing::error!("badge dispatcher thread panicked");
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<S: NotificationSource>(
    service: Arc<NotificationService<S>>,
    rx: Receiver<Command>,
) {
    tracing::debug!("badge dispatcher started");
    for command in rx.iter() {
        match command {
            Command::Event(event) => {
                tracing::trace!(?event, "dispatching notification event");
                service.apply(event);
            }
            Command::Stop => break,
        }
    }
    tracing::debug!("badge dispatcher stopped");
}
