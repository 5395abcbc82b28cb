//! REST access to the Classify server
//!
//! Thin wrapper over `reqwest` that resolves paths against the configured base
//! URL and decodes bodies leniently: an empty body is `null`, a non JSON body
//! is kept as a string.

use std::sync::Arc;

use dashmap::DashMap;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Decoded answer to a REST call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    /// Body when the status is the expected one, a command fault otherwise
    pub fn expect(self, status: StatusCode, title: &str) -> ClientResult<Value> {
        if self.status == status {
            return Ok(self.body);
        }
        let detail = match &self.body {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Err(ClientError::command(
            title,
            format!("server answered {} {}", self.status, detail)
                .trim_end()
                .to_string(),
        ))
    }
}

/// Shared REST client. Clones share the connection pool and the schema cache.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base: Url,
    schemas: Arc<DashMap<String, Value>>,
}

impl ApiClient {
    pub fn new(base: Url) -> ClientResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base,
            schemas: Arc::new(DashMap::new()),
        })
    }

    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        Ok(Self::new(config.server_base()?)?)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::command("Request", format!("invalid path {}: {}", path, e)))
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> ClientResult<ApiResponse> {
        let url = self.url(path)?;
        tracing::debug!(%method, %url, "request");

        let mut request = self.client.request(method, url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ApiResponse { status, body })
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> ClientResult<ApiResponse> {
        self.send::<()>(Method::GET, path, query, None).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<ApiResponse> {
        self.send(Method::POST, path, &[], Some(body)).await
    }

    pub async fn patch_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<ApiResponse> {
        self.send(Method::PATCH, path, &[], Some(body)).await
    }

    pub async fn put(&self, path: &str, query: &[(&str, &str)]) -> ClientResult<ApiResponse> {
        self.send::<()>(Method::PUT, path, query, None).await
    }

    pub async fn delete(&self, path: &str, query: &[(&str, &str)]) -> ClientResult<ApiResponse> {
        self.send::<()>(Method::DELETE, path, query, None).await
    }

    /// Per-ref configuration schema of a family, fetched once per process
    pub async fn schema(&self, family_path: &str) -> ClientResult<Value> {
        if let Some(cached) = self.schemas.get(family_path) {
            return Ok(cached.value().clone());
        }

        let path = format!("{}/config", family_path);
        let body = self
            .get(&path, &[])
            .await
            .map_err(|e| e.retitle("Get config"))?
            .expect(StatusCode::OK, "Get config")?;

        self.schemas.insert(family_path.to_string(), body.clone());
        Ok(body)
    }

    pub fn clear_schemas(&self) {
        self.schemas.clear();
    }
}
