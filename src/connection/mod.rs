//! Push channel to the Classify server
//!
//! One websocket per manager. Status changes are broadcast without
//! duplicates. After an error or a close a single retry timer reopens the
//! socket after a fixed delay, forever, until `disconnect()`.

pub mod state;
pub mod wire;

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ClientConfig;

pub use state::{ConnectionStatus, ReconnectMachine, Transition, TransportSignal};
pub use wire::{decode_frame, ServerEvent};

/// Owns the websocket and its reconnect loop
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    delay: Duration,
    machine: Mutex<ReconnectMachine>,
    status_tx: broadcast::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<ServerEvent>,
    /// Lossless consumers, fed in transport order
    feeds: Mutex<Vec<mpsc::UnboundedSender<ServerEvent>>>,
    transport: Mutex<Option<JoinHandle<()>>>,
    retry: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>, delay: Duration, capacity: usize) -> Self {
        let (status_tx, _) = broadcast::channel(capacity);
        let (events_tx, _) = broadcast::channel(capacity);

        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                delay,
                machine: Mutex::new(ReconnectMachine::new()),
                status_tx,
                events_tx,
                feeds: Mutex::new(Vec::new()),
                transport: Mutex::new(None),
                retry: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.socket_url.clone(),
            config.reconnect_delay(),
            config.event_capacity,
        )
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Open the channel if it is not already live and subscribe to status changes.
    ///
    /// Repeated calls while connecting, open or waiting for a retry only add a
    /// subscriber.
    pub fn connect(&self) -> broadcast::Receiver<ConnectionStatus> {
        let rx = self.inner.status_tx.subscribe();

        {
            let mut machine = self.inner.machine.lock();
            let live = !machine.is_torn_down() && machine.status() != ConnectionStatus::None;
            if live {
                return rx;
            }
            machine.revive();
            let transition = machine.apply(TransportSignal::Connecting);
            self.inner.publish(transition);
        }

        tracing::info!(url = %self.inner.url, "opening push channel");
        Inner::spawn_transport(&self.inner);
        rx
    }

    /// Tap decoded inbound events. A tap that falls more than the channel
    /// capacity behind skips events; use [`ConnectionManager::event_feed`]
    /// where every event matters.
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Every decoded inbound event, unbounded and in transport order
    pub fn event_feed(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.feeds.lock().push(tx);
        rx
    }

    /// Subscribe to status changes without opening the channel
    pub fn watch_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.machine.lock().status()
    }

    /// Tear the channel down and cancel any pending retry
    pub fn disconnect(&self) {
        {
            let mut machine = self.inner.machine.lock();
            if machine.status() == ConnectionStatus::None {
                machine.shutdown();
                return;
            }
            machine.shutdown();
            let transition = machine.apply(TransportSignal::Closing);
            self.inner.publish(transition);
        }

        if let Some(handle) = self.inner.retry.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.inner.transport.lock().take() {
            handle.abort();
        }

        self.inner.signal(TransportSignal::Closed);
        tracing::info!(url = %self.inner.url, "push channel torn down");
    }
}

impl Inner {
    fn deliver(&self, event: ServerEvent) {
        self.feeds.lock().retain(|feed| feed.send(event.clone()).is_ok());
        let _ = self.events_tx.send(event);
    }

    fn publish(&self, transition: Transition) {
        if let Some(status) = transition.emit {
            tracing::info!(status = %status, "connection status");
            let _ = self.status_tx.send(status);
        }
    }

    /// Feed a signal to the machine, publish the change and arm the retry timer.
    /// The machine lock is held while publishing so receivers observe the order
    /// the machine decided.
    fn signal(self: &Arc<Self>, signal: TransportSignal) {
        let transition = {
            let mut machine = self.machine.lock();
            let transition = machine.apply(signal);
            self.publish(transition);
            transition
        };

        if transition.schedule_retry {
            self.schedule_retry();
        }
    }

    fn schedule_retry(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let delay = self.delay;
        tracing::debug!(delay_ms = delay.as_millis() as u64, "retry scheduled");

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let reopen = inner.machine.lock().retry_fired();
            if reopen {
                Inner::open(&inner);
            }
        });

        if let Some(previous) = self.retry.lock().replace(handle) {
            // the previous timer has already fired
            previous.abort();
        }
    }

    fn open(self: &Arc<Self>) {
        self.signal(TransportSignal::Connecting);
        self.spawn_transport();
    }

    fn spawn_transport(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let url = self.url.clone();

        let handle = tokio::spawn(async move {
            let ended = run_transport(&url, &weak).await;
            if let Some(inner) = weak.upgrade() {
                inner.signal(ended);
            }
        });

        if let Some(previous) = self.transport.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.retry.get_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.transport.get_mut().take() {
            handle.abort();
        }
    }
}

/// Drive one websocket until it fails or closes. Returns the terminal signal.
async fn run_transport(
    url: &str,
    inner: &Weak<Inner>,
) -> TransportSignal {
    let mut ws_stream = match tokio_tungstenite::connect_async(url).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            tracing::warn!(url, error = %e, "push channel connect failed");
            return TransportSignal::Errored;
        }
    };

    match inner.upgrade() {
        Some(inner) => inner.signal(TransportSignal::Opened),
        None => return TransportSignal::Closed,
    }

    while let Some(msg) = ws_stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match decode_frame(text.as_str()) {
                Ok(event) => {
                    tracing::debug!(topic = %event.topic, "event received");
                    match inner.upgrade() {
                        Some(inner) => inner.deliver(event),
                        None => return TransportSignal::Closed,
                    }
                }
                Err(e) => tracing::warn!(error = %e, "dropping undecodable frame"),
            },
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "server closed push channel");
                return TransportSignal::Closed;
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("dropping binary frame");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "push channel failed");
                return TransportSignal::Errored;
            }
        }
    }

    TransportSignal::Closed
}
