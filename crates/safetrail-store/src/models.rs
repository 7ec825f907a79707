//! Data models for stored documents.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use safetrail_types::Fields;

/// A document row as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Full document path, e.g. `users/r1/sharedLocations/s1`.
    pub path: String,
    /// Path of the containing collection, e.g. `users/r1/sharedLocations`.
    pub collection: String,
    /// Last path segment.
    pub id: String,
    /// Document fields.
    pub fields: Fields,
    /// When the document was last written.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
