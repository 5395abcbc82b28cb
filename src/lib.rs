//! # Classify client
//!
//! Reactive cache and event synchronization layer for Classify servers.
//!
//! ## Features
//!
//! - **Push channel**: one websocket per session, reopened after a fixed delay
//!   whenever it drops
//! - **Fan-out**: pushed events delivered to every subscriber whose topic
//!   prefix matches, in transport order
//! - **Dual-indexed caches**: imports, exports and items indexed by name and
//!   by type, kept in step with the server by commands and pushed events
//! - **Collection scope**: caches bound to the selected collection and rebuilt
//!   when the server restarts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use classify::{ClassifySession, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::load(None)?;
//!     let session = ClassifySession::new(&config)?;
//!     session.start()?;
//!
//!     let scope = session.select_collection("films");
//!     for import in scope.imports.list().await?.iter() {
//!         println!("{:?}", import);
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod collections;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod families;
pub mod logging;
pub mod session;

// Re-export main types for library consumers
pub use api::{ApiClient, ApiResponse};
pub use cache::{ActionKind, CacheSnapshot, Outcome, Rejection, ResourceCache};
pub use collections::{Collection, CollectionsApi};
pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionStatus, ServerEvent};
pub use dispatch::{EventDispatcher, Subscription};
pub use error::{ClientError, ClientResult, ErrorCategory};
pub use families::{Export, Import, Item};
pub use session::{ClassifySession, CollectionScope, SessionNotice};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
