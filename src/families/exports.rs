use std::str::FromStr;

use serde_json::Value;

use super::DirectoryParams;
use crate::cache::family::params_from_value;
use crate::cache::{content_hash, ActionKind, Resource, ResourceFamily};
use crate::error::{ClientError, ClientResult};

/// Export destination. The server names exports on creation.
#[derive(Debug, Clone, PartialEq)]
pub enum Export {
    Directory { name: String, params: DirectoryParams },
}

impl Export {
    /// A directory destination not yet known to the server
    pub fn directory(path: impl Into<String>, is_recursive: bool) -> Self {
        Export::Directory {
            name: String::new(),
            params: DirectoryParams::new(path, is_recursive),
        }
    }
}

impl Resource for Export {
    fn name(&self) -> &str {
        match self {
            Export::Directory { name, .. } => name,
        }
    }

    fn type_tag(&self) -> &'static str {
        match self {
            Export::Directory { .. } => ExportRef::Directory.as_str(),
        }
    }

    fn params(&self) -> Value {
        match self {
            Export::Directory { params, .. } => {
                serde_json::to_value(params).unwrap_or(Value::Null)
            }
        }
    }

    fn with_name(&self, name: &str) -> Self {
        match self {
            Export::Directory { params, .. } => Export::Directory {
                name: name.to_string(),
                params: params.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportRef {
    Directory,
}

impl ExportRef {
    fn as_str(&self) -> &'static str {
        match self {
            ExportRef::Directory => "directory",
        }
    }
}

impl FromStr for ExportRef {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directory" => Ok(ExportRef::Directory),
            other => Err(ClientError::UnknownType {
                family: ExportFamily::FAMILY,
                tag: other.to_string(),
            }),
        }
    }
}

pub struct ExportFamily;

impl ResourceFamily for ExportFamily {
    type Resource = Export;

    const FAMILY: &'static str = "exports";
    const NOUN: &'static str = "export";

    fn base_path(_collection: &str) -> String {
        Self::FAMILY.to_string()
    }

    fn identity(resource: &Export) -> String {
        content_hash(resource.type_tag(), &resource.params())
    }

    fn decode(tag: &str, name: &str, params: Value) -> ClientResult<Export> {
        match tag.parse::<ExportRef>()? {
            ExportRef::Directory => Ok(Export::Directory {
                name: name.to_string(),
                params: params_from_value(Self::FAMILY, tag, params)?,
            }),
        }
    }

    fn supports(kind: ActionKind) -> bool {
        matches!(kind, ActionKind::Force | ActionKind::Stop)
    }

    fn invalidates_related(kind: ActionKind) -> bool {
        kind == ActionKind::Force
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_ignores_name() {
        let local = Export::directory("/backup", true);
        let named = local.with_name("42");
        assert_eq!(ExportFamily::identity(&local), ExportFamily::identity(&named));
        assert_ne!(
            ExportFamily::identity(&local),
            ExportFamily::identity(&Export::directory("/backup", false))
        );
    }

    #[test]
    fn test_decode() {
        let export =
            ExportFamily::decode("directory", "7", json!({"path": "/out"})).unwrap();
        assert_eq!(export.name(), "7");
        assert_eq!(export.params(), json!({"path": "/out", "is_recursive": false}));
        assert!(ExportFamily::decode("s3", "7", json!({})).is_err());
    }

    #[test]
    fn test_actions() {
        assert!(ExportFamily::supports(ActionKind::Force));
        assert!(!ExportFamily::supports(ActionKind::Start));
        assert!(ExportFamily::invalidates_related(ActionKind::Force));
    }
}
