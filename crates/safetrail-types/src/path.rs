//! Hierarchical document paths.
//!
//! Documents are addressed the way the hosted document database addresses
//! them: alternating collection and document ids joined by `/`, for example
//! `users/r1/sharedLocations/s1`.

use core::fmt;
use std::str::FromStr;

use crate::error::{ParseError, ParseResult};
use crate::types::UserKey;

/// Top-level collection holding one document per user.
pub const USERS_COLLECTION: &str = "users";

/// Per-recipient sub-collection holding one document per sender.
pub const SHARED_LOCATIONS_COLLECTION: &str = "sharedLocations";

/// A validated path to a document or collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    /// Parse a `/`-separated path.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidPath`] for an empty path or one with empty
    /// segments (leading, trailing, or doubled slashes).
    ///
    /// ```
    /// use safetrail_types::DocumentPath;
    ///
    /// let path = DocumentPath::parse("users/r1/sharedLocations/s1").unwrap();
    /// assert_eq!(path.id(), "s1");
    /// assert!(DocumentPath::parse("users//r1").is_err());
    /// ```
    pub fn parse(path: &str) -> ParseResult<Self> {
        Self::from_segments(path.split('/'))
    }

    /// Build a path from individual segments.
    pub fn from_segments<I, S>(segments: I) -> ParseResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty() || s.contains('/')) {
            return Err(ParseError::InvalidPath(segments.join("/")));
        }
        Ok(Self { segments })
    }

    /// `users/{uid}`
    #[must_use]
    pub fn user(uid: &UserKey) -> Self {
        Self {
            segments: vec![USERS_COLLECTION.to_string(), uid.as_str().to_string()],
        }
    }

    /// `users/{recipient}/sharedLocations`
    #[must_use]
    pub fn shared_locations(recipient: &UserKey) -> Self {
        let mut path = Self::user(recipient);
        path.segments.push(SHARED_LOCATIONS_COLLECTION.to_string());
        path
    }

    /// `users/{recipient}/sharedLocations/{sender}`
    #[must_use]
    pub fn shared_location(recipient: &UserKey, sender: &UserKey) -> Self {
        let mut path = Self::shared_locations(recipient);
        path.segments.push(sender.as_str().to_string());
        path
    }

    /// Append a segment.
    pub fn child(&self, segment: &str) -> ParseResult<Self> {
        if segment.is_empty() || segment.contains('/') {
            return Err(ParseError::InvalidPath(format!("{}/{}", self, segment)));
        }
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// The path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last segment (document or collection id).
    #[must_use]
    pub fn id(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The enclosing path, or `None` for a single-segment path.
    #[must_use]
    pub fn parent(&self) -> Option<DocumentPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Whether the path names a document (even segment count) rather than a collection.
    #[must_use]
    pub fn is_document(&self) -> bool {
        self.segments.len() % 2 == 0
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for DocumentPath {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
