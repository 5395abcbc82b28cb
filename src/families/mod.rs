//! Resource families served by the Classify server

pub mod exports;
pub mod imports;
pub mod items;

use serde::{Deserialize, Serialize};

pub use exports::{Export, ExportFamily};
pub use imports::{ImapParams, ImapRequest, ImapSearch, Import, ImportFamily};
pub use items::{Item, ItemFamily, Movie};

/// Local directory source or destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryParams {
    pub path: String,
    #[serde(default)]
    pub is_recursive: bool,
}

impl DirectoryParams {
    pub fn new(path: impl Into<String>, is_recursive: bool) -> Self {
        Self {
            path: path.into(),
            is_recursive,
        }
    }
}
