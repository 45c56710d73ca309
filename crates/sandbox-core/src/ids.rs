//! Strongly-typed numeric ids for backend entities.
//!
//! The backend identifies every entity by a numeric id and its JSON documents
//! encode those ids as strings (`"ID": "42"`). The wrappers below accept both
//! encodings and prevent an image id from being passed where a template id is
//! expected.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Parses a backend id from its string or number form.
///
/// # Errors
///
/// Returns an error if the input is not a non-negative integer.
pub fn parse_id(input: &str) -> Result<u64> {
    input
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::ParseError(format!("Invalid entity id `{input}`")))
}

struct IdVisitor;

impl Visitor<'_> for IdVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a numeric id or a string containing one")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<u64, E> {
        u64::try_from(v).map_err(|_| E::custom(format!("negative id {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<u64, E> {
        parse_id(v).map_err(E::custom)
    }
}

/// Deserializes a `u64` that may be encoded as a string.
///
/// # Errors
///
/// Fails when the value is neither an integer nor a string holding one.
pub fn deserialize_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(IdVisitor)
}

/// Macro to generate strongly-typed id wrapper types.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $doc:expr) => {
        $(#[$meta])*
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new id wrapper.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw id.
            #[must_use]
            pub const fn get(&self) -> u64 {
                self.0
            }

            /// Parses an id from a string.
            ///
            /// # Errors
            ///
            /// Returns an error if the string is not a valid id.
            pub fn parse_str(input: &str) -> Result<Self> {
                parse_id(input).map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u64 {
            fn from(wrapper: $name) -> Self {
                wrapper.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse_str(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                deserialize_u64(deserializer).map(Self)
            }
        }
    };
}

// Generate all id types
id_type!(UserId, "User ID");
id_type!(GroupId, "Group ID");
id_type!(DatastoreId, "Datastore ID");
id_type!(NetworkId, "Virtual network ID");
id_type!(ImageId, "Image ID");
id_type!(TemplateId, "VM template ID");
id_type!(ServiceTemplateId, "Service template ID");
id_type!(ServiceId, "Service ID");
id_type!(MarketplaceId, "Marketplace ID");
id_type!(ApplianceId, "Marketplace appliance ID");
id_type!(VmId, "Virtual machine ID");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert_eq!(parse_id(" 7\n").unwrap(), 7);
        assert!(parse_id("-1").is_err());
        assert!(parse_id("abc").is_err());
    }

    #[test]
    fn test_id_from_str() {
        let id: ImageId = "12".parse().unwrap();
        assert_eq!(id.get(), 12);
        assert_eq!(id.to_string(), "12");
        assert!("twelve".parse::<ImageId>().is_err());
    }

    #[test]
    fn test_id_deserialize_string_and_number() {
        let from_string: TemplateId = serde_json::from_str("\"5\"").unwrap();
        let from_number: TemplateId = serde_json::from_str("5").unwrap();
        assert_eq!(from_string, from_number);
        assert!(serde_json::from_str::<TemplateId>("\"-5\"").is_err());
        assert!(serde_json::from_str::<TemplateId>("-5").is_err());
    }

    #[test]
    fn test_id_serializes_as_number() {
        let json = serde_json::to_string(&ServiceId::new(9)).unwrap();
        assert_eq!(json, "9");
    }

    #[test]
    fn test_id_conversions() {
        let id = UserId::from(3);
        let raw: u64 = id.into();
        assert_eq!(raw, 3);
        assert_eq!(GroupId::new(0), GroupId::parse_str("0").unwrap());
    }
}
