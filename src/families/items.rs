//! Cataloged collection entries
//!
//! Items are created by the server when buffered imports are validated, so the
//! client never adds them; it lists, deletes and follows them through events.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::family::{decode_grouped, params_from_value};
use crate::cache::{ActionKind, Resource, ResourceFamily};
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Movie {
    pub name: String,
    pub url: String,
    pub released: String,
    /// Minutes
    pub duration: u32,
    pub image: String,
    pub description: String,
    pub directors: Vec<String>,
    pub cast: Vec<String>,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Movie { name: String, movie: Movie },
}

impl Resource for Item {
    fn name(&self) -> &str {
        match self {
            Item::Movie { name, .. } => name,
        }
    }

    fn type_tag(&self) -> &'static str {
        match self {
            Item::Movie { .. } => ItemRef::Movie.as_str(),
        }
    }

    fn params(&self) -> Value {
        match self {
            Item::Movie { movie, .. } => serde_json::to_value(movie).unwrap_or(Value::Null),
        }
    }

    fn with_name(&self, name: &str) -> Self {
        match self {
            Item::Movie { movie, .. } => Item::Movie {
                name: name.to_string(),
                movie: movie.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemRef {
    Movie,
}

impl ItemRef {
    fn as_str(&self) -> &'static str {
        match self {
            ItemRef::Movie => "movie",
        }
    }
}

impl FromStr for ItemRef {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(ItemRef::Movie),
            other => Err(ClientError::UnknownType {
                family: ItemFamily::FAMILY,
                tag: other.to_string(),
            }),
        }
    }
}

pub struct ItemFamily;

impl ResourceFamily for ItemFamily {
    type Resource = Item;

    const FAMILY: &'static str = "items";
    const NOUN: &'static str = "item";

    fn base_path(collection: &str) -> String {
        format!("collections/{}/items", collection)
    }

    fn resource_path(collection: &str, name: &str) -> String {
        format!("collections/{}/items/{}", collection, name)
    }

    fn identity(resource: &Item) -> String {
        resource.name().to_string()
    }

    fn decode(tag: &str, name: &str, params: Value) -> ClientResult<Item> {
        match tag.parse::<ItemRef>()? {
            ItemRef::Movie => Ok(Item::Movie {
                name: name.to_string(),
                movie: params_from_value(Self::FAMILY, tag, params)?,
            }),
        }
    }

    fn supports_add() -> bool {
        false
    }

    fn supports(_kind: ActionKind) -> bool {
        false
    }

    fn scope_query(_name: &str, _collection: &str) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    fn list_query(_collection: &str) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// Items also come as a flat array of `{name, ref, params}` entries
    fn decode_listing(body: Value) -> Vec<ClientResult<Item>> {
        let entries = match body {
            Value::Array(entries) => entries,
            Value::Object(_) | Value::Null => return decode_grouped::<Self>(body),
            other => {
                return vec![Err(ClientError::invalid_payload(
                    Self::FAMILY,
                    format!("expected an array or an object, got {}", other),
                ))]
            }
        };

        entries
            .into_iter()
            .map(|entry| {
                let name = entry
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ClientError::invalid_payload(Self::FAMILY, "missing name"))?;
                let tag = entry
                    .get("ref")
                    .and_then(Value::as_str)
                    .unwrap_or(ItemRef::Movie.as_str());
                let params = entry.get("params").cloned().unwrap_or(Value::Null);
                Self::decode(tag, name, params)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_movie_with_partial_fields() {
        let item = ItemFamily::decode(
            "movie",
            "tt0133093",
            json!({"name": "The Matrix", "duration": 136, "genres": ["sci-fi"]}),
        )
        .unwrap();
        match &item {
            Item::Movie { name, movie } => {
                assert_eq!(name, "tt0133093");
                assert_eq!(movie.name, "The Matrix");
                assert_eq!(movie.duration, 136);
                assert!(movie.cast.is_empty());
            }
        }
    }

    #[test]
    fn test_listing_as_array_and_map() {
        let from_array = ItemFamily::decode_listing(json!([
            {"name": "a", "ref": "movie", "params": {"name": "A"}},
            {"name": "b", "params": {"name": "B"}},
            {"ref": "movie"}
        ]));
        assert_eq!(from_array.len(), 3);
        assert!(from_array[0].is_ok());
        assert!(from_array[1].is_ok());
        assert!(from_array[2].is_err());

        let from_map = ItemFamily::decode_listing(json!({"movie": {"a": {"name": "A"}}}));
        assert_eq!(from_map.len(), 1);
        assert_eq!(from_map[0].as_ref().unwrap().name(), "a");
    }

    #[test]
    fn test_item_paths() {
        assert_eq!(ItemFamily::base_path("films"), "collections/films/items");
        assert_eq!(
            ItemFamily::resource_path("films", "tt1"),
            "collections/films/items/tt1"
        );
        assert!(!ItemFamily::supports_add());
    }
}
