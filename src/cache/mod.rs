//! Generic resource cache
//!
//! Holds the client side view of one resource family for one collection.
//! Commands go through a two-phase mutation: the cache is marked stale while
//! the request is in flight, then the indices are updated on success or the
//! previous validity is restored on failure. Pushed events are merged with
//! [`ResourceCache::reconcile`], which is idempotent with the command path.
//! Changes that land while a listing is being fetched are replayed over it.

pub mod family;
pub mod index;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use serde_json::Value;

use crate::api::ApiClient;
use crate::error::{ClientError, ClientResult};

pub use family::{content_hash, ActionKind, Invalidate, Resource, ResourceFamily};
pub use index::{CacheSnapshot, DualIndex, Upserted};

/// Why a command was refused without contacting the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    AlreadyExists { identity: String },
    NotFound { name: String },
    Unsupported { operation: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::AlreadyExists { identity } => write!(f, "already existing '{}'", identity),
            Rejection::NotFound { name } => write!(f, "'{}' not found", name),
            Rejection::Unsupported { operation } => write!(f, "'{}' is not supported", operation),
        }
    }
}

/// Result of a cache command that reached a decision
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Committed(T),
    Rejected(Rejection),
    /// The server needs more parameters before it can create the resource
    NeedsParams(Value),
}

impl<T> Outcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed(_))
    }

    pub fn committed(self) -> Option<T> {
        match self {
            Outcome::Committed(value) => Some(value),
            _ => None,
        }
    }
}

/// Effect of a pushed event on the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Inserted,
    Replaced,
    Removed,
    /// Removal of something the cache did not hold
    Unchanged,
}

type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// One index change, from a committed command or a pushed event
#[derive(Debug, Clone)]
enum Change<R> {
    Upsert(R),
    Remove(String),
}

impl<R: Resource> Change<R> {
    fn apply(&self, index: &mut DualIndex<R>) -> Reconciled {
        match self {
            Change::Upsert(resource) => match index.upsert(resource.clone()) {
                Upserted::Inserted => Reconciled::Inserted,
                Upserted::Replaced => Reconciled::Replaced,
            },
            Change::Remove(name) => match index.remove(name) {
                Some(_) => Reconciled::Removed,
                None => Reconciled::Unchanged,
            },
        }
    }
}

struct CacheState<R> {
    index: DualIndex<R>,
    valid: bool,
    /// Bumped by `invalidate`
    generation: u64,
    /// Mutations between begin and commit/abort
    pending: usize,
    /// Validity to restore once no mutation is pending
    resume_valid: bool,
    /// Changes made while a full fetch is in flight, replayed over its result
    replay: Option<Vec<Change<R>>>,
}

impl<R: Resource> CacheState<R> {
    fn record(&mut self, change: Change<R>) -> Reconciled {
        let effect = change.apply(&mut self.index);
        if let Some(replay) = self.replay.as_mut() {
            replay.push(change);
        }
        effect
    }
}

/// Dual-indexed cache of one family, scoped to one collection
pub struct ResourceCache<F: ResourceFamily> {
    api: ApiClient,
    collection: String,
    state: Mutex<CacheState<F::Resource>>,
    fetch_gate: tokio::sync::Mutex<()>,
    on_change: RwLock<Option<ChangeListener>>,
    related: RwLock<Vec<Weak<dyn Invalidate>>>,
}

impl<F: ResourceFamily> ResourceCache<F> {
    pub fn new(api: ApiClient, collection: impl Into<String>) -> Self {
        Self {
            api,
            collection: collection.into(),
            state: Mutex::new(CacheState {
                index: DualIndex::new(),
                valid: false,
                generation: 0,
                pending: 0,
                resume_valid: false,
                replay: None,
            }),
            fetch_gate: tokio::sync::Mutex::new(()),
            on_change: RwLock::new(None),
            related: RwLock::new(Vec::new()),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn path(&self) -> String {
        F::base_path(&self.collection)
    }

    pub fn is_valid(&self) -> bool {
        self.state.lock().valid
    }

    pub fn snapshot(&self) -> CacheSnapshot<F::Resource> {
        self.state.lock().index.snapshot()
    }

    pub fn get(&self, name: &str) -> Option<F::Resource> {
        self.state.lock().index.get(name).map(|r| r.as_ref().clone())
    }

    /// Whether both indices currently agree
    pub fn is_consistent(&self) -> bool {
        self.state.lock().index.is_consistent()
    }

    /// Called after every committed index change
    pub fn set_on_change(&self, listener: impl Fn() + Send + Sync + 'static) {
        *self.on_change.write() = Some(Arc::new(listener));
    }

    /// Caches made stale by actions that invalidate related views
    pub fn link_related(&self, related: Weak<dyn Invalidate>) {
        self.related.write().push(related);
    }

    /// Per-ref configuration schema, cached process-wide
    pub async fn schema(&self) -> ClientResult<Value> {
        self.api.schema(&self.path()).await
    }

    /// Current listing. Served from memory when valid, fetched otherwise.
    pub async fn list(&self) -> ClientResult<CacheSnapshot<F::Resource>> {
        if let Some(snapshot) = self.valid_snapshot() {
            return Ok(snapshot);
        }

        // one fetch at a time; latecomers reuse its result
        let _gate = self.fetch_gate.lock().await;
        if let Some(snapshot) = self.valid_snapshot() {
            return Ok(snapshot);
        }

        let window = self.open_fetch_window();
        let title = format!("List {}", F::FAMILY);
        let query = F::list_query(&self.collection);
        let body = self
            .api
            .get(&self.path(), &query_pairs(&query))
            .await
            .map_err(|e| e.retitle(&title))?
            .expect(StatusCode::OK, &title)?;

        let mut index = DualIndex::new();
        for entry in F::decode_listing(body) {
            match entry {
                Ok(resource) => {
                    index.upsert(resource);
                }
                Err(e) => tracing::warn!(family = F::FAMILY, error = %e, "skipping listed entry"),
            }
        }
        let snapshot = window.install(index);
        tracing::debug!(family = F::FAMILY, count = snapshot.len(), "cache rebuilt");
        self.notify();
        Ok(snapshot)
    }

    /// Create a resource on the server and cache it under the server's name
    pub async fn add(&self, resource: F::Resource) -> ClientResult<Outcome<F::Resource>> {
        if !F::supports_add() {
            return Ok(self.reject(Rejection::Unsupported {
                operation: format!("add {}", F::NOUN),
            }));
        }

        let identity = F::identity(&resource);
        let exists = {
            let state = self.state.lock();
            (!resource.name().is_empty() && state.index.contains(resource.name()))
                || state.index.iter().any(|r| F::identity(r) == identity)
        };
        if exists {
            return Ok(self.reject(Rejection::AlreadyExists { identity }));
        }

        let title = format!("Add {}", F::NOUN);
        let pending = self.begin();
        let body = F::create_body(&resource, &self.collection);

        let response = self
            .api
            .post_json(&self.path(), &body)
            .await
            .map_err(|e| e.retitle(&title))?;
        let body = response.expect(StatusCode::OK, &title)?;

        let name = body
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        match name {
            Some(name) => {
                let stored = resource.with_name(&name);
                pending.commit(Change::Upsert(stored.clone()));
                tracing::info!(family = F::FAMILY, name = %name, "added");
                Ok(Outcome::Committed(stored))
            }
            None => {
                drop(pending);
                tracing::info!(family = F::FAMILY, "server asked for more parameters");
                Ok(Outcome::NeedsParams(body))
            }
        }
    }

    /// Delete a cached resource on the server
    pub async fn delete(&self, resource: &F::Resource) -> ClientResult<Outcome<()>> {
        let name = resource.name().to_string();
        if !self.state.lock().index.contains(&name) {
            return Ok(self.reject(Rejection::NotFound { name }));
        }

        let title = format!("Delete {}", F::NOUN);
        let pending = self.begin();
        let query = F::scope_query(&name, &self.collection);

        self.api
            .delete(&F::resource_path(&self.collection, &name), &query_pairs(&query))
            .await
            .map_err(|e| e.retitle(&title))?
            .expect(StatusCode::NO_CONTENT, &title)?;

        pending.commit(Change::Remove(name.clone()));
        tracing::info!(family = F::FAMILY, name = %name, "deleted");
        Ok(Outcome::Committed(()))
    }

    /// Start, stop or force a cached resource. Never changes this cache.
    pub async fn action(&self, kind: ActionKind, resource: &F::Resource) -> ClientResult<Outcome<()>> {
        if !F::supports(kind) {
            return Ok(self.reject(Rejection::Unsupported {
                operation: format!("{} {}", kind, F::NOUN),
            }));
        }

        let name = resource.name().to_string();
        if !self.state.lock().index.contains(&name) {
            return Ok(self.reject(Rejection::NotFound { name }));
        }

        let title = match kind {
            ActionKind::Start => format!("Start {}", F::NOUN),
            ActionKind::Stop => format!("Stop {}", F::NOUN),
            ActionKind::Force => format!("Force {}", F::NOUN),
        };
        let path = format!("{}/{}", self.path(), kind);
        let query = F::scope_query(&name, &self.collection);

        self.api
            .put(&path, &query_pairs(&query))
            .await
            .map_err(|e| e.retitle(&title))?
            .expect(StatusCode::NO_CONTENT, &title)?;

        tracing::info!(family = F::FAMILY, name = %name, action = %kind, "action done");
        if F::invalidates_related(kind) {
            self.invalidate_related();
        }
        Ok(Outcome::Committed(()))
    }

    /// Merge a pushed `{name, ref, params, removed?}` payload
    pub fn reconcile(&self, payload: &Value) -> ClientResult<Reconciled> {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ClientError::invalid_payload(F::FAMILY, "missing name"))?;

        let removed = payload
            .get("removed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let change = if removed {
            Change::Remove(name.to_string())
        } else {
            let tag = payload
                .get("ref")
                .and_then(Value::as_str)
                .ok_or_else(|| ClientError::invalid_payload(F::FAMILY, "missing ref"))?;
            let params = payload.get("params").cloned().unwrap_or(Value::Null);
            Change::Upsert(F::decode(tag, name, params)?)
        };
        let change = self.state.lock().record(change);

        tracing::debug!(family = F::FAMILY, name, ?change, "event merged");
        if change != Reconciled::Unchanged {
            self.notify();
        }
        Ok(change)
    }

    /// Mark the cache stale so the next `list()` refetches
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.valid = false;
        state.resume_valid = false;
        state.generation += 1;
        tracing::debug!(family = F::FAMILY, "cache invalidated");
    }

    fn invalidate_related(&self) {
        let mut related = self.related.write();
        related.retain(|weak| match weak.upgrade() {
            Some(cache) => {
                cache.invalidate();
                true
            }
            None => false,
        });
    }

    fn valid_snapshot(&self) -> Option<CacheSnapshot<F::Resource>> {
        let state = self.state.lock();
        state.valid.then(|| state.index.snapshot())
    }

    fn reject<T>(&self, rejection: Rejection) -> Outcome<T> {
        tracing::warn!(family = F::FAMILY, collection = %self.collection, "{}", rejection);
        Outcome::Rejected(rejection)
    }

    fn notify(&self) {
        let listener = self.on_change.read().clone();
        if let Some(listener) = listener {
            listener();
        }
    }

    /// Start recording changes made while a full listing is fetched
    fn open_fetch_window(&self) -> FetchWindow<'_, F> {
        let mut state = self.state.lock();
        state.replay = Some(Vec::new());
        FetchWindow {
            cache: self,
            generation: state.generation,
        }
    }

    fn begin(&self) -> PendingMutation<'_, F> {
        let mut state = self.state.lock();
        if state.pending == 0 {
            state.resume_valid = state.valid;
        }
        state.pending += 1;
        state.valid = false;
        PendingMutation {
            cache: self,
            done: false,
        }
    }

    fn finish(&self, change: Option<Change<F::Resource>>) {
        let mut state = self.state.lock();
        if let Some(change) = change {
            state.record(change);
        }
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            state.valid = state.resume_valid;
        }
    }
}

impl<F: ResourceFamily> Invalidate for ResourceCache<F> {
    fn invalidate(&self) {
        ResourceCache::invalidate(self);
    }
}

/// A mutation between its request and its answer. Dropping it without
/// committing restores the validity the cache had before.
struct PendingMutation<'a, F: ResourceFamily> {
    cache: &'a ResourceCache<F>,
    done: bool,
}

impl<F: ResourceFamily> PendingMutation<'_, F> {
    fn commit(mut self, change: Change<F::Resource>) {
        self.done = true;
        self.cache.finish(Some(change));
        self.cache.notify();
    }
}

impl<F: ResourceFamily> Drop for PendingMutation<'_, F> {
    fn drop(&mut self) {
        if !self.done {
            self.cache.finish(None);
        }
    }
}

/// A full fetch in flight. Dropping it without installing stops the recording.
struct FetchWindow<'a, F: ResourceFamily> {
    cache: &'a ResourceCache<F>,
    generation: u64,
}

impl<F: ResourceFamily> FetchWindow<'_, F> {
    /// Swap in the fetched index with every change made meanwhile applied on
    /// top, and return what is now cached
    fn install(self, mut index: DualIndex<F::Resource>) -> CacheSnapshot<F::Resource> {
        let mut state = self.cache.state.lock();
        let replay = state.replay.take().unwrap_or_default();
        for change in &replay {
            change.apply(&mut index);
        }
        if !replay.is_empty() {
            tracing::debug!(family = F::FAMILY, replayed = replay.len(), "changes replayed over listing");
        }
        state.index = index;

        // an invalidation during the fetch means the listing may predate it
        let fresh = state.generation == self.generation;
        if state.pending > 0 {
            state.resume_valid = fresh;
        } else {
            state.valid = fresh;
        }
        state.index.snapshot()
    }
}

impl<F: ResourceFamily> Drop for FetchWindow<'_, F> {
    fn drop(&mut self) {
        self.cache.state.lock().replay = None;
    }
}

fn query_pairs<'a>(query: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a str)> {
    query.iter().map(|(key, value)| (*key, value.as_str())).collect()
}
