use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id {raw:?}: expected {prefix}_<uuid>")]
pub struct InvalidId {
    pub kind: &'static str,
    pub prefix: &'static str,
    pub raw: String,
}

/// Prefixed UUIDv7 identifiers. Creation order is string order.
macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(format!("{}_{}", Self::PREFIX, Uuid::now_v7()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// When the id was minted, from its UUIDv7 timestamp.
            pub fn issued_at(&self) -> Option<DateTime<Utc>> {
                let uuid = Uuid::parse_str(self.0.get(Self::PREFIX.len() + 1..)?).ok()?;
                let (secs, nanos) = uuid.get_timestamp()?.to_unix();
                DateTime::from_timestamp(secs as i64, nanos)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let valid = s
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .is_some_and(|uuid| Uuid::parse_str(uuid).is_ok());
                if valid {
                    Ok(Self(s.to_string()))
                } else {
                    Err(InvalidId {
                        kind: stringify!($name),
                        prefix: Self::PREFIX,
                        raw: s.to_string(),
                    })
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidId;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

prefixed_id!(
    /// One assessment request.
    RequestId,
    "req"
);
prefixed_id!(DialogueId, "dlg");
prefixed_id!(AlertId, "alert");
