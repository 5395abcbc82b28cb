//! Import sources: local directories and IMAP mailboxes

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DirectoryParams;
use crate::cache::family::params_from_value;
use crate::cache::{content_hash, ActionKind, Resource, ResourceFamily};
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Import {
    Directory { name: String, params: DirectoryParams },
    Imap { name: String, params: ImapParams },
}

/// What the IMAP import fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ImapRequest {
    #[default]
    Search,
    All,
}

impl TryFrom<u8> for ImapRequest {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ImapRequest::Search),
            1 => Ok(ImapRequest::All),
            other => Err(format!("unknown imap request {}", other)),
        }
    }
}

impl From<ImapRequest> for u8 {
    fn from(request: ImapRequest) -> Self {
        match request {
            ImapRequest::Search => 0,
            ImapRequest::All => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImapSearch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub larger: u32,
    #[serde(default)]
    pub smaller: u32,
    #[serde(default)]
    pub text: Vec<String>,
}

/// IMAP mailbox source. An empty mailbox makes the server answer with the
/// list of mailboxes to choose from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImapParams {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub request: ImapRequest,
    #[serde(default)]
    pub mailbox: String,
    #[serde(default, rename = "onlyAttached")]
    pub only_attached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<ImapSearch>,
}

impl Import {
    pub fn directory(name: impl Into<String>, path: impl Into<String>, is_recursive: bool) -> Self {
        Import::Directory {
            name: name.into(),
            params: DirectoryParams::new(path, is_recursive),
        }
    }

    pub fn imap(name: impl Into<String>, params: ImapParams) -> Self {
        Import::Imap {
            name: name.into(),
            params,
        }
    }
}

impl Resource for Import {
    fn name(&self) -> &str {
        match self {
            Import::Directory { name, .. } | Import::Imap { name, .. } => name,
        }
    }

    fn type_tag(&self) -> &'static str {
        match self {
            Import::Directory { .. } => ImportRef::Directory.as_str(),
            Import::Imap { .. } => ImportRef::Imap.as_str(),
        }
    }

    fn params(&self) -> Value {
        let encoded = match self {
            Import::Directory { params, .. } => serde_json::to_value(params),
            Import::Imap { params, .. } => serde_json::to_value(params),
        };
        encoded.unwrap_or(Value::Null)
    }

    fn with_name(&self, name: &str) -> Self {
        match self {
            Import::Directory { params, .. } => Import::Directory {
                name: name.to_string(),
                params: params.clone(),
            },
            Import::Imap { params, .. } => Import::Imap {
                name: name.to_string(),
                params: params.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportRef {
    Directory,
    Imap,
}

impl ImportRef {
    fn as_str(&self) -> &'static str {
        match self {
            ImportRef::Directory => "directory",
            ImportRef::Imap => "imap",
        }
    }
}

impl FromStr for ImportRef {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directory" => Ok(ImportRef::Directory),
            "imap" => Ok(ImportRef::Imap),
            other => Err(ClientError::UnknownType {
                family: ImportFamily::FAMILY,
                tag: other.to_string(),
            }),
        }
    }
}

pub struct ImportFamily;

impl ResourceFamily for ImportFamily {
    type Resource = Import;

    const FAMILY: &'static str = "imports";
    const NOUN: &'static str = "import";

    fn base_path(_collection: &str) -> String {
        Self::FAMILY.to_string()
    }

    /// The caller's name, or the content when no name was given
    fn identity(resource: &Import) -> String {
        if resource.name().is_empty() {
            content_hash(resource.type_tag(), &resource.params())
        } else {
            resource.name().to_string()
        }
    }

    fn decode(tag: &str, name: &str, params: Value) -> ClientResult<Import> {
        let name = name.to_string();
        match tag.parse::<ImportRef>()? {
            ImportRef::Directory => Ok(Import::Directory {
                name,
                params: params_from_value(Self::FAMILY, tag, params)?,
            }),
            ImportRef::Imap => Ok(Import::Imap {
                name,
                params: params_from_value(Self::FAMILY, tag, params)?,
            }),
        }
    }

    fn supports(kind: ActionKind) -> bool {
        matches!(kind, ActionKind::Start | ActionKind::Stop)
    }

    /// Starting an import feeds new items into the collection
    fn invalidates_related(kind: ActionKind) -> bool {
        kind == ActionKind::Start
    }
}
