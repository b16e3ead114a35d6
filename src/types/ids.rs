use std::fmt;
use std::hash::{Hash, Hasher};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Defines a server-assigned identifier.
///
/// The backend emits identifiers as JSON integers or as JSON strings depending
/// on the table they come from.  Both forms compare equal when their textual
/// value matches, and an identifier that arrived as an integer is sent back as
/// one.
macro_rules! server_id {
    ($name:ident, $what:literal) => {
        #[doc = concat!("Identifier of a ", $what, ".")]
        #[derive(Clone, Debug)]
        pub struct $name {
            value: String,
            numeric: bool,
        }

        impl $name {
            /// Creates an identifier from its textual form.
            pub fn new(value: impl Into<String>) -> Self {
                Self {
                    value: value.into(),
                    numeric: false,
                }
            }

            /// Returns the textual form of the identifier.
            pub fn as_str(&self) -> &str {
                &self.value
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.value == other.value
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.value.hash(state);
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self {
                    value: value.to_string(),
                    numeric: true,
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                match self.value.parse::<i64>() {
                    Ok(n) if self.numeric => serializer.serialize_i64(n),
                    _ => serializer.serialize_str(&self.value),
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let (value, numeric) = deserializer.deserialize_any(IdVisitor)?;
                Ok(Self { value, numeric })
            }
        }
    };
}

server_id!(UserId, "user");
server_id!(MessageId, "message");
server_id!(FileId, "file attachment");

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = (String, bool);

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string or integer identifier")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok((v.to_string(), true))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok((v.to_string(), true))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok((v.to_string(), false))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok((v, false))
    }
}
