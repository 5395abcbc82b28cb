//! Topic routing for pushed events

use crate::error::{ClientError, ClientResult};

pub const RESTART_TOPIC: &str = "start";
pub const IMPORT_PREFIX: &str = "import";
pub const COLLECTION_PREFIX: &str = "collection";

/// Where a collection event is headed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Buffer,
    Items,
    Other(String),
}

impl Destination {
    fn parse(segment: &str) -> Self {
        match segment {
            "buffer" => Destination::Buffer,
            "items" => Destination::Items,
            other => Destination::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The server restarted; every cached view is stale
    Restart,

    /// Import activity. `status` is set for `.../status` topics carrying a
    /// running flag.
    Import { status: bool },

    Collection {
        collection: String,
        destination: Option<Destination>,
    },

    Unrouted,
}

/// Classify a topic. Collection topics need at least a collection segment.
pub fn route(topic: &str) -> ClientResult<Route> {
    if topic == RESTART_TOPIC {
        return Ok(Route::Restart);
    }

    if topic.starts_with(IMPORT_PREFIX) {
        return Ok(Route::Import {
            status: topic.ends_with("status"),
        });
    }

    if topic.starts_with(COLLECTION_PREFIX) {
        let mut segments = topic.split('/').skip(1);
        let collection = match segments.next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(ClientError::MalformedTopic {
                    topic: topic.to_string(),
                })
            }
        };
        return Ok(Route::Collection {
            collection,
            destination: segments.next().map(Destination::parse),
        });
    }

    Ok(Route::Unrouted)
}
