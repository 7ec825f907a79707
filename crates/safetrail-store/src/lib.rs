//! SQLite document store for SafeTrail.
//!
//! This crate persists the hierarchical documents the sharing controller
//! reads and writes (user profiles and `sharedLocations` records) in a
//! local SQLite database.
//!
//! # Features
//!
//! - Path-addressed JSON documents with overwrite and merge writes
//! - Collection listing for the recipient's share view
//! - Schema versioning
//! - An async [`SqliteDocumentStore`] implementing `safetrail_core::DocumentStore`
//!
//! # Example
//!
//! ```no_run
//! use safetrail_store::Store;
//! use safetrail_types::{DocumentPath, UserKey};
//!
//! let store = Store::open_default()?;
//! let recipient = UserKey::new("bob").unwrap();
//! let shares = store.list_collection(&DocumentPath::shared_locations(&recipient))?;
//! println!("{} shares", shares.len());
//! # Ok::<(), safetrail_store::Error>(())
//! ```

mod document_store;
mod error;
mod models;
mod schema;
mod store;

pub use document_store::SqliteDocumentStore;
pub use error::{Error, Result};
pub use models::StoredDocument;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/safetrail/data.db`
/// - macOS: `~/Library/Application Support/safetrail/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\safetrail\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("safetrail")
        .join("data.db")
}
