//! What a resource family plugs into the generic cache

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{ClientError, ClientResult};

/// Immutable value managed by a cache
pub trait Resource: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Unique name inside the family, empty until the server assigned one
    fn name(&self) -> &str;

    /// Type/reference tag used as the secondary index
    fn type_tag(&self) -> &'static str;

    /// Wire parameter bag
    fn params(&self) -> Value;

    /// Same resource under another name
    fn with_name(&self, name: &str) -> Self;
}

/// Server side operations beyond add/delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Start,
    Stop,
    Force,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Force => "force",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ActionKind::Start),
            "stop" => Ok(ActionKind::Stop),
            "force" => Ok(ActionKind::Force),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// Something that can be told its view is stale
pub trait Invalidate: Send + Sync {
    fn invalidate(&self);
}

/// Family specific behavior of a [`ResourceCache`](super::ResourceCache)
pub trait ResourceFamily: Send + Sync + 'static {
    type Resource: Resource;

    /// Family name used in logs and unknown-type errors
    const FAMILY: &'static str;

    /// Singular noun for command titles ("Add import")
    const NOUN: &'static str;

    /// REST path of the family for a collection
    fn base_path(collection: &str) -> String;

    /// REST path of a single resource, for deletions
    fn resource_path(collection: &str, _name: &str) -> String {
        Self::base_path(collection)
    }

    /// Key deciding whether two resources are the same one
    fn identity(resource: &Self::Resource) -> String;

    /// Build a resource from a wire tag, name and parameter bag
    fn decode(tag: &str, name: &str, params: Value) -> ClientResult<Self::Resource>;

    /// Whether new resources can be created from the client
    fn supports_add() -> bool {
        true
    }

    fn supports(kind: ActionKind) -> bool;

    /// Whether a successful action makes linked caches stale
    fn invalidates_related(_kind: ActionKind) -> bool {
        false
    }

    /// Query scoping a request on one resource
    fn scope_query(name: &str, collection: &str) -> Vec<(&'static str, String)> {
        vec![("name", name.to_string()), ("collection", collection.to_string())]
    }

    /// Query of the full listing
    fn list_query(collection: &str) -> Vec<(&'static str, String)> {
        vec![("collection", collection.to_string())]
    }

    /// Body of the creation request
    fn create_body(resource: &Self::Resource, collection: &str) -> Value {
        let mut body = Map::new();
        if !resource.name().is_empty() {
            body.insert("name".into(), Value::String(resource.name().to_string()));
        }
        body.insert("ref".into(), Value::String(resource.type_tag().to_string()));
        body.insert("params".into(), resource.params());
        body.insert(
            "collections".into(),
            Value::Array(vec![Value::String(collection.to_string())]),
        );
        Value::Object(body)
    }

    /// Decode a full listing shaped `{tag: {name: params}}`.
    ///
    /// Entries that fail to decode are returned as errors so the caller can
    /// log and skip them.
    fn decode_listing(body: Value) -> Vec<ClientResult<Self::Resource>> {
        decode_grouped::<Self>(body)
    }
}

/// Decode the `{tag: {name: params}}` listing layout of a family
pub fn decode_grouped<F: ResourceFamily + ?Sized>(body: Value) -> Vec<ClientResult<F::Resource>> {
    let groups = match body {
        Value::Object(groups) => groups,
        Value::Null => return Vec::new(),
        other => {
            return vec![Err(ClientError::invalid_payload(
                F::FAMILY,
                format!("expected an object, got {}", other),
            ))]
        }
    };

    let mut decoded = Vec::new();
    for (tag, entries) in groups {
        match entries {
            Value::Object(entries) => {
                for (name, params) in entries {
                    decoded.push(F::decode(&tag, &name, params));
                }
            }
            other => decoded.push(Err(ClientError::invalid_payload(
                F::FAMILY,
                format!("group '{}' is not an object: {}", tag, other),
            ))),
        }
    }
    decoded
}

/// SHA-256 over the tag and the canonical JSON of the parameters
pub fn content_hash(tag: &str, params: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    hasher.update([0u8]);
    // serde_json maps are sorted, so this rendering is canonical
    hasher.update(params.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Deserialize a family parameter bag, naming the family in the error
pub fn params_from_value<T: serde::de::DeserializeOwned>(
    family: &str,
    tag: &str,
    params: Value,
) -> ClientResult<T> {
    serde_json::from_value(params)
        .map_err(|e| ClientError::invalid_payload(format!("{} {}", family, tag), e))
}
