//! Collection-scoped session
//!
//! Binds one connection and one dispatcher for its whole life and keeps a set
//! of caches for the selected collection. Selecting another collection throws
//! the previous caches away. A server restart rebuilds everything from scratch.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::cache::{Invalidate, ResourceCache, ResourceFamily};
use crate::collections::CollectionsApi;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ServerEvent};
use crate::dispatch::{route, Destination, EventDispatcher, Route, Subscription};
use crate::error::ClientResult;
use crate::families::{ExportFamily, ImportFamily, ItemFamily};

/// Name the router registers under in the dispatcher
const ROUTER_KEY: &str = "session";

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Every cached view was rebuilt after a server restart
    ServerRestarted,
    CollectionSelected(Option<String>),
    /// A family cache of the selected collection changed
    ListChanged(&'static str),
}

/// The caches of one selected collection
pub struct CollectionScope {
    pub name: String,
    pub imports: Arc<ResourceCache<ImportFamily>>,
    pub exports: Arc<ResourceCache<ExportFamily>>,
    pub items: Arc<ResourceCache<ItemFamily>>,
}

impl CollectionScope {
    fn new(api: &ApiClient, name: &str, notices: &broadcast::Sender<SessionNotice>) -> Arc<Self> {
        let imports = Arc::new(ResourceCache::<ImportFamily>::new(api.clone(), name));
        let exports = Arc::new(ResourceCache::<ExportFamily>::new(api.clone(), name));
        let items = Arc::new(ResourceCache::<ItemFamily>::new(api.clone(), name));

        let related: Weak<dyn Invalidate> = Arc::downgrade(&items) as Weak<dyn Invalidate>;
        imports.link_related(related.clone());
        exports.link_related(related);

        notify_changes(&imports, notices);
        notify_changes(&exports, notices);
        notify_changes(&items, notices);

        Arc::new(Self {
            name: name.to_string(),
            imports,
            exports,
            items,
        })
    }
}

fn notify_changes<F: ResourceFamily>(
    cache: &ResourceCache<F>,
    notices: &broadcast::Sender<SessionNotice>,
) {
    let notices = notices.clone();
    cache.set_on_change(move || {
        let _ = notices.send(SessionNotice::ListChanged(F::FAMILY));
    });
}

/// Client session against one Classify server
#[derive(Clone)]
pub struct ClassifySession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    api: ApiClient,
    connection: ConnectionManager,
    dispatcher: EventDispatcher,
    collections: CollectionsApi,
    scope: RwLock<Option<Arc<CollectionScope>>>,
    notices: broadcast::Sender<SessionNotice>,
    import_activity: watch::Sender<usize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClassifySession {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let api = ApiClient::from_config(config)?;
        let connection = ConnectionManager::from_config(config);
        Ok(Self::with_parts(api, connection, config.event_capacity))
    }

    pub fn with_parts(api: ApiClient, connection: ConnectionManager, capacity: usize) -> Self {
        let (notices, _) = broadcast::channel(capacity);
        let (import_activity, _) = watch::channel(0);

        Self {
            inner: Arc::new(SessionInner {
                collections: CollectionsApi::new(api.clone()),
                api,
                connection,
                dispatcher: EventDispatcher::new(),
                scope: RwLock::new(None),
                notices,
                import_activity,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Connect and start routing events. Calling it again is a no-op.
    pub fn start(&self) -> ClientResult<()> {
        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() {
            return Ok(());
        }

        let subscription = self.inner.dispatcher.subscribe(ROUTER_KEY, "")?;
        // subscribe before connecting so no early event is missed
        tasks.push(self.inner.dispatcher.attach(self.inner.connection.event_feed()));
        tasks.push(tokio::spawn(route_events(
            Arc::downgrade(&self.inner),
            subscription,
        )));
        drop(tasks);

        self.inner.connection.connect();
        tracing::info!(url = %self.inner.connection.url(), "session started");
        Ok(())
    }

    /// Switch to `name`, with fresh empty caches
    pub fn select_collection(&self, name: &str) -> Arc<CollectionScope> {
        let scope = CollectionScope::new(&self.inner.api, name, &self.inner.notices);
        *self.inner.scope.write() = Some(scope.clone());
        tracing::info!(collection = name, "collection selected");
        let _ = self
            .inner
            .notices
            .send(SessionNotice::CollectionSelected(Some(name.to_string())));
        scope
    }

    pub fn deselect(&self) {
        if self.inner.scope.write().take().is_some() {
            tracing::info!("collection deselected");
            let _ = self.inner.notices.send(SessionNotice::CollectionSelected(None));
        }
    }

    pub fn current(&self) -> Option<Arc<CollectionScope>> {
        self.inner.scope.read().clone()
    }

    /// Delete a collection on the server, leaving it first when selected
    pub async fn delete_collection(&self, name: &str) -> ClientResult<()> {
        self.inner.collections.delete(name).await?;
        let selected = self
            .current()
            .map(|scope| scope.name == name)
            .unwrap_or(false);
        if selected {
            self.deselect();
        }
        Ok(())
    }

    pub fn collections(&self) -> &CollectionsApi {
        &self.inner.collections
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.inner.notices.subscribe()
    }

    /// Number of imports currently running on the server
    pub fn import_activity(&self) -> watch::Receiver<usize> {
        self.inner.import_activity.subscribe()
    }

    /// Follow the buffer of `collection` under the subscriber key `name`
    pub fn subscribe_buffer(&self, name: &str, collection: &str) -> ClientResult<Subscription> {
        self.inner
            .dispatcher
            .subscribe(name, &format!("collection/{}/buffer", collection))
    }

    /// Disconnect and stop routing
    pub fn shutdown(&self) {
        self.inner.connection.disconnect();
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!("session stopped");
    }
}

impl SessionInner {
    fn handle(&self, event: ServerEvent) {
        let routed = match route(&event.topic) {
            Ok(routed) => routed,
            Err(e) => {
                tracing::warn!(error = %e, "dropping event");
                return;
            }
        };

        match routed {
            Route::Restart => self.reload(),
            Route::Import { status: true } if event.payload.is_boolean() => {
                self.track_import(event.payload.as_bool().unwrap_or(false));
            }
            Route::Import { .. } => {
                let scope = self.scope.read().clone();
                if let Some(scope) = scope {
                    merge(&scope.imports, &event);
                }
            }
            Route::Collection {
                collection,
                destination,
            } => {
                let Some(scope) = self.scope.read().clone() else {
                    return;
                };
                if scope.name != collection {
                    tracing::debug!(collection = %collection, "event for another collection");
                    return;
                }
                match destination {
                    Some(Destination::Items) => merge(&scope.items, &event),
                    Some(Destination::Buffer) => {
                        tracing::debug!(topic = %event.topic, "buffer event left to buffer subscribers")
                    }
                    _ => tracing::debug!(topic = %event.topic, "unhandled collection event"),
                }
            }
            Route::Unrouted => tracing::debug!(topic = %event.topic, "unrouted event"),
        }
    }

    fn track_import(&self, running: bool) {
        self.import_activity.send_modify(|count| {
            if running {
                *count += 1;
            } else if *count > 0 {
                *count -= 1;
            }
        });
        tracing::debug!(running = *self.import_activity.borrow(), "import activity");
    }

    /// Server restarted: forget everything fetched so far
    fn reload(&self) {
        tracing::info!("server restarted, reloading");

        {
            let mut scope = self.scope.write();
            let selected = scope.as_ref().map(|current| current.name.clone());
            if let Some(name) = selected {
                *scope = Some(CollectionScope::new(&self.api, &name, &self.notices));
            }
        }
        self.collections.invalidate();
        self.api.clear_schemas();
        self.import_activity.send_replace(0);

        let _ = self.notices.send(SessionNotice::ServerRestarted);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

fn merge<F: ResourceFamily>(cache: &ResourceCache<F>, event: &ServerEvent) {
    if let Err(e) = cache.reconcile(&event.payload) {
        tracing::warn!(family = F::FAMILY, topic = %event.topic, error = %e, "dropping event");
    }
}

async fn route_events(session: Weak<SessionInner>, mut subscription: Subscription) {
    while let Some(event) = subscription.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        session.handle(event);
    }
}
