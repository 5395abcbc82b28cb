//! Collections and references, cached once fetched

use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::ApiClient;
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Collection {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            params: Value::Null,
        }
    }
}

#[derive(Default)]
struct Cached {
    collections: Option<Vec<Collection>>,
    references: Option<Value>,
}

pub struct CollectionsApi {
    api: ApiClient,
    cached: Mutex<Cached>,
}

impl CollectionsApi {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            cached: Mutex::new(Cached::default()),
        }
    }

    pub async fn list(&self) -> ClientResult<Vec<Collection>> {
        if let Some(collections) = self.cached.lock().collections.clone() {
            return Ok(collections);
        }

        let body = self
            .api
            .get("collections", &[])
            .await
            .map_err(|e| e.retitle("List collections"))?
            .expect(StatusCode::OK, "List collections")?;

        let collections: Vec<Collection> = match body {
            Value::Null => Vec::new(),
            body => serde_json::from_value(body)
                .map_err(|e| ClientError::invalid_payload("collections", e))?,
        };

        self.cached.lock().collections = Some(collections.clone());
        Ok(collections)
    }

    pub async fn create(&self, collection: Collection) -> ClientResult<()> {
        self.api
            .post_json("collections", &collection)
            .await
            .map_err(|e| e.retitle("Create collection"))?
            .expect(StatusCode::NO_CONTENT, "Create collection")?;

        tracing::info!(name = %collection.name, "collection created");
        if let Some(list) = self.cached.lock().collections.as_mut() {
            list.push(collection);
        }
        Ok(())
    }

    pub async fn modify(&self, name: &str, collection: Collection) -> ClientResult<()> {
        self.api
            .patch_json(&format!("collections/{}", name), &collection)
            .await
            .map_err(|e| e.retitle("Modify collection"))?
            .expect(StatusCode::NO_CONTENT, "Modify collection")?;

        tracing::info!(name, "collection modified");
        if let Some(list) = self.cached.lock().collections.as_mut() {
            if let Some(slot) = list.iter_mut().find(|c| c.name == name) {
                *slot = collection;
            }
        }
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> ClientResult<()> {
        self.api
            .delete(&format!("collections/{}", name), &[])
            .await
            .map_err(|e| e.retitle("Delete collection"))?
            .expect(StatusCode::NO_CONTENT, "Delete collection")?;

        tracing::info!(name, "collection deleted");
        if let Some(list) = self.cached.lock().collections.as_mut() {
            list.retain(|c| c.name != name);
        }
        Ok(())
    }

    /// Websites and collection kinds the server knows about
    pub async fn references(&self) -> ClientResult<Value> {
        if let Some(references) = self.cached.lock().references.clone() {
            return Ok(references);
        }

        let body = self
            .api
            .get("references", &[])
            .await
            .map_err(|e| e.retitle("Get references"))?
            .expect(StatusCode::OK, "Get references")?;

        self.cached.lock().references = Some(body.clone());
        Ok(body)
    }

    /// Drop both caches
    pub fn invalidate(&self) {
        let mut cached = self.cached.lock();
        cached.collections = None;
        cached.references = None;
    }
}
