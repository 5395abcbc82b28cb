//! Prefix based fan-out of pushed events
//!
//! Every subscriber registered under a distinct name receives each event whose
//! topic starts with its prefix, in the order the transport delivered them.

pub mod topic;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::ServerEvent;
use crate::error::{ClientError, ClientResult};

pub use topic::{route, Destination, Route};

#[derive(Default)]
struct Registry {
    entries: HashMap<String, Entry>,
}

struct Entry {
    prefix: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Registry of named topic subscribers
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` for every topic starting with `prefix`.
    ///
    /// Fails when `name` is already registered; the existing registration is
    /// left untouched.
    pub fn subscribe(&self, name: &str, prefix: &str) -> ClientResult<Subscription> {
        let mut registry = self.registry.lock();
        if registry.entries.contains_key(name) {
            tracing::warn!(name, "already existing observer");
            return Err(ClientError::DuplicateSubscriber {
                name: name.to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        registry.entries.insert(
            name.to_string(),
            Entry {
                prefix: prefix.to_string(),
                tx,
            },
        );
        tracing::debug!(name, prefix, "subscriber registered");

        Ok(Subscription {
            name: name.to_string(),
            rx,
            registry: Arc::downgrade(&self.registry),
        })
    }

    /// Deliver one event to every matching subscriber. Returns how many got it.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let registry = self.registry.lock();
        let mut delivered = 0;

        for (name, entry) in registry.entries.iter() {
            if !event.topic.starts_with(&entry.prefix) {
                continue;
            }
            if entry.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(name = %name, "subscriber receiver gone");
            }
        }

        if delivered == 0 {
            tracing::debug!(topic = %event.topic, "event without subscriber");
        }
        delivered
    }

    /// Pump a connection's event feed into the registry until it closes
    pub fn attach(&self, mut events: mpsc::UnboundedReceiver<ServerEvent>) -> JoinHandle<()> {
        let dispatcher = self.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                dispatcher.dispatch(&event);
            }
            tracing::debug!("event feed closed");
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().entries.len()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.lock().entries.contains_key(name)
    }
}

/// A live registration. Dropping it unregisters the name.
pub struct Subscription {
    name: String,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next matching event, `None` once the dispatcher is gone
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = ServerEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().entries.remove(&self.name);
            tracing::debug!(name = %self.name, "subscriber removed");
        }
    }
}
