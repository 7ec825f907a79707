//! Core value types for SafeTrail location shares.

use core::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};

/// Mean Earth radius in meters (IUGG).
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// A latitude/longitude pair in decimal degrees (WGS 84).
///
/// Construct through [`Coordinates::new`] to get range validation. The fields
/// stay public so records decoded from storage can be inspected directly;
/// use [`Coordinates::validate`] before acting on untrusted values.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coordinates {
    /// Latitude in degrees, `-90.0..=90.0`.
    pub latitude: f64,
    /// Longitude in degrees, `-180.0..=180.0`.
    pub longitude: f64,
}

impl Coordinates {
    /// Create validated coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidCoordinates`] if either component is not
    /// finite or is outside its valid range.
    ///
    /// # Examples
    ///
    /// ```
    /// use safetrail_types::Coordinates;
    ///
    /// assert!(Coordinates::new(37.7749, -122.4194).is_ok());
    /// assert!(Coordinates::new(91.0, 0.0).is_err());
    /// assert!(Coordinates::new(f64::NAN, 0.0).is_err());
    /// ```
    pub fn new(latitude: f64, longitude: f64) -> ParseResult<Self> {
        let coords = Self {
            latitude,
            longitude,
        };
        coords.validate()?;
        Ok(coords)
    }

    /// Check that both components are finite and in range.
    pub fn validate(&self) -> ParseResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ParseError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }

    /// Returns `true` if both components are finite and in range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in meters (haversine formula).
    ///
    /// ```
    /// use safetrail_types::Coordinates;
    ///
    /// let a = Coordinates::new(0.0, 0.0).unwrap();
    /// let b = Coordinates::new(0.0, 1.0).unwrap();
    /// let d = a.distance_to(&b);
    /// assert!((d - 111_195.0).abs() < 10.0);
    /// ```
    #[must_use]
    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_METERS * c
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Wall-clock instant in milliseconds since the Unix epoch.
///
/// Stored documents carry timestamps as bare integers, so this type
/// serializes transparently as an `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch.
    pub const UNIX_EPOCH: Timestamp = Timestamp(0);

    /// Create a timestamp from Unix milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Unix milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// The current system wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from(OffsetDateTime::now_utc())
    }

    /// Add a duration, saturating at `i64::MAX` milliseconds.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        let diff = self.0.saturating_sub(earlier.0);
        if diff <= 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(diff as u64)
        }
    }

    /// Convert to an `OffsetDateTime` in UTC, if representable.
    #[must_use]
    pub fn to_offset_date_time(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0) * 1_000_000).ok()
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(value: OffsetDateTime) -> Self {
        Self((value.unix_timestamp_nanos() / 1_000_000) as i64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Kind of location share.
///
/// Serialized with the document names used by the mobile app: one-time
/// shares are stored as `"current"`, live shares as `"live"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShareKind {
    /// Single write with a short fixed expiry; never refreshed.
    #[cfg_attr(feature = "serde", serde(rename = "current"))]
    OneTime,
    /// Refreshed from position samples until it expires or is cancelled.
    #[cfg_attr(feature = "serde", serde(rename = "live"))]
    Live,
}

impl ShareKind {
    /// The name stored in the `type` field of a shared-location document.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareKind::OneTime => "current",
            ShareKind::Live => "live",
        }
    }
}

impl fmt::Display for ShareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareKind::OneTime => write!(f, "One-time"),
            ShareKind::Live => write!(f, "Live"),
        }
    }
}

/// Identity of a user, usable as a single document path segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct UserKey(String);

impl UserKey {
    /// Create a user key.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidKey`] if the key is empty, surrounded by
    /// whitespace, or contains a `/`.
    ///
    /// ```
    /// use safetrail_types::UserKey;
    ///
    /// assert!(UserKey::new("sender123").is_ok());
    /// assert!(UserKey::new("").is_err());
    /// assert!(UserKey::new("a/b").is_err());
    /// ```
    pub fn new(key: impl Into<String>) -> ParseResult<Self> {
        let key = key.into();
        if key.is_empty() || key.contains('/') || key.trim() != key {
            return Err(ParseError::InvalidKey(key));
        }
        Ok(Self(key))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserKey {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserKey> for String {
    fn from(value: UserKey) -> Self {
        value.0
    }
}

impl AsRef<str> for UserKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_bounds() {
        assert!(Coordinates::new(90.0, 180.0).is_ok());
        assert!(Coordinates::new(-90.0, -180.0).is_ok());
        assert!(Coordinates::new(-90.1, 0.0).is_err());
        assert!(Coordinates::new(0.0, 180.5).is_err());
        assert!(Coordinates::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_coordinates_invalid_error_carries_values() {
        let err = Coordinates::new(100.0, 5.0).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidCoordinates {
                latitude: 100.0,
                longitude: 5.0
            }
        );
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let a = Coordinates::new(1.0, 2.0).unwrap();
        assert!(a.distance_to(&a).abs() < f64::EPSILON);
    }

    #[test]
    fn test_distance_small_displacement() {
        // ~11 m north at the equator
        let a = Coordinates::new(0.0, 0.0).unwrap();
        let b = Coordinates::new(0.0001, 0.0).unwrap();
        let d = a.distance_to(&b);
        assert!(d > 10.0 && d < 12.5, "distance was {}", d);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t0 = Timestamp::from_millis(1_000_000);
        let t1 = t0.saturating_add(Duration::from_secs(3600));
        assert_eq!(t1.as_millis(), 4_600_000);
        assert_eq!(t1.saturating_duration_since(t0), Duration::from_secs(3600));
        assert_eq!(t0.saturating_duration_since(t1), Duration::ZERO);
    }

    #[test]
    fn test_timestamp_saturates() {
        let t = Timestamp::from_millis(i64::MAX - 1);
        assert_eq!(
            t.saturating_add(Duration::from_secs(10)).as_millis(),
            i64::MAX
        );
    }

    #[test]
    fn test_timestamp_offset_date_time_roundtrip() {
        let dt = OffsetDateTime::from_unix_timestamp(1_714_564_800).unwrap();
        let ts = Timestamp::from(dt);
        assert_eq!(ts.as_millis(), dt.unix_timestamp() * 1000);
        assert_eq!(ts.to_offset_date_time(), Some(dt));
    }

    #[test]
    fn test_share_kind_wire_names() {
        assert_eq!(ShareKind::OneTime.as_str(), "current");
        assert_eq!(ShareKind::Live.as_str(), "live");
        assert_eq!(ShareKind::Live.to_string(), "Live");
        assert_eq!(ShareKind::OneTime.to_string(), "One-time");
    }

    #[test]
    fn test_user_key_rejects_padding() {
        assert!(UserKey::new(" r1").is_err());
        assert!(UserKey::new("r1 ").is_err());
        assert_eq!(UserKey::new("r1").unwrap().as_str(), "r1");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_share_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&ShareKind::OneTime).unwrap(),
            "\"current\""
        );
        assert_eq!(serde_json::to_string(&ShareKind::Live).unwrap(), "\"live\"");
        let kind: ShareKind = serde_json::from_str("\"live\"").unwrap();
        assert_eq!(kind, ShareKind::Live);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_user_key_deserialize_validates() {
        let ok: UserKey = serde_json::from_str("\"s1\"").unwrap();
        assert_eq!(ok.as_str(), "s1");
        assert!(serde_json::from_str::<UserKey>("\"a/b\"").is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_timestamp_serializes_as_integer() {
        let ts = Timestamp::from_millis(4_600_000);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "4600000");
    }
}
