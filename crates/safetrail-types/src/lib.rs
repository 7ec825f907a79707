//! Platform-agnostic types for SafeTrail location sharing.
//!
//! This crate provides the data model shared by the sharing controller
//! (safetrail-core), the SQLite document store (safetrail-store) and the
//! companion service.
//!
//! # Features
//!
//! - Validated coordinates and user keys
//! - Millisecond wall-clock timestamps
//! - Hierarchical document paths (`users/{recipient}/sharedLocations/{sender}`)
//! - The shared-location record and its document field encoding
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use safetrail_types::{Coordinates, SharedLocationRecord, Timestamp};
//!
//! let record = SharedLocationRecord::live(
//!     Coordinates::new(1.0, 2.0).unwrap(),
//!     Timestamp::from_millis(1_000_000),
//!     Duration::from_secs(3600),
//! );
//! assert_eq!(record.expires_at.as_millis(), 4_600_000);
//! ```

pub mod error;
pub mod path;
pub mod record;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use path::{DocumentPath, SHARED_LOCATIONS_COLLECTION, USERS_COLLECTION};
#[cfg(feature = "serde")]
pub use record::Fields;
pub use record::{ShareKey, SharedLocationRecord};
pub use types::{Coordinates, ShareKind, Timestamp, UserKey};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_valid_coordinates_accepted(lat in -90.0f64..=90.0, lon in -180.0f64..=180.0) {
            prop_assert!(Coordinates::new(lat, lon).is_ok());
        }

        #[test]
        fn prop_distance_is_symmetric(
            lat1 in -89.0f64..89.0, lon1 in -179.0f64..179.0,
            lat2 in -89.0f64..89.0, lon2 in -179.0f64..179.0,
        ) {
            let a = Coordinates::new(lat1, lon1).unwrap();
            let b = Coordinates::new(lat2, lon2).unwrap();
            prop_assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 1e-6);
        }

        #[test]
        fn prop_expiry_never_before_start(start in 0i64..i64::MAX / 2, secs in 0u64..1_000_000) {
            let record = SharedLocationRecord::live(
                Coordinates::new(0.0, 0.0).unwrap(),
                Timestamp::from_millis(start),
                std::time::Duration::from_secs(secs),
            );
            prop_assert!(record.expires_at >= record.started_at);
            prop_assert_eq!(record.expires_at.as_millis() - start, (secs * 1000) as i64);
        }
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::InvalidPath("users//x".to_string());
        assert_eq!(err.to_string(), "Invalid document path: 'users//x'");

        let err = ParseError::InvalidKey("".to_string());
        assert!(format!("{:?}", err).contains("InvalidKey"));
    }
}
