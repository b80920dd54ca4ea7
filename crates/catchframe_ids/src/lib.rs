//! Identifier wrappers shared by the intake and pipeline crates.
//!
//! A `ReportId` is the join key across the artifact store, the record store
//! and the trigger channel, so it is validated once at the boundary and then
//! passed around as an opaque string.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned when a UUID-backed identifier cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! define_uuid_id {
    ($name:ident, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Allocate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Parse and normalise (lowercase hyphenated form).
            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                let trimmed = value.trim();
                let uuid = Uuid::parse_str(trimmed)
                    .map_err(|e| IdParseError::new(format!("Invalid {} '{}': {}", $label, trimmed, e)))?;
                Ok(Self(uuid.hyphenated().to_string()))
            }

            /// Parse raw bytes, as carried by a trigger message payload.
            pub fn from_bytes(raw: &[u8]) -> Result<Self, IdParseError> {
                let text = std::str::from_utf8(raw)
                    .map_err(|_| IdParseError::new(format!("{} payload is not UTF-8", $label)))?;
                Self::parse(text)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

define_uuid_id!(ReportId, "report ID");
