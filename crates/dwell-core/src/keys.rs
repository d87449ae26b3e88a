//! Key type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The bucket size was zero or negative.
    #[error("bucket size must be positive, got {size_ns}ns")]
    NonPositiveBucketSize { size_ns: i64 },
}

/// Generates a validated string key newtype with common trait implementations.
macro_rules! define_string_key {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new key after validation.
            pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
                let key = key.into();
                if key.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(key))
            }

            /// Returns the key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(key: $name) -> Self {
                key.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_key!(
    /// The finest-grained tracked instance within a metric.
    ///
    /// One sub-key per concrete holder of the tracked state (e.g. one wakelock
    /// holder). Distinct sub-keys may collapse to the same [`OutputKey`].
    SubKey, "sub-key"
);

define_string_key!(
    /// The dimension under which aggregated durations are reported.
    ///
    /// Many [`SubKey`]s may map to one output key; the accumulator takes the
    /// max across them, not the sum.
    OutputKey, "output key"
);

define_string_key!(
    /// Identifies one predicate instance in the external condition subsystem.
    ///
    /// Stored on tracked entries as a non-owning lookup key; the condition's
    /// boolean state arrives through `note_condition_changed`, never by
    /// querying the condition subsystem from here.
    ConditionInstanceKey, "condition instance key"
);
