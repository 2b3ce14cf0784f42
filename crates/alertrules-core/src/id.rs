use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::ServiceError;

/// Length of the hex encoding of an [`Id`].
pub const ID_LENGTH: usize = 16;

/// Opaque, fixed-width identifier for rules, organizations, users, labels,
/// endpoints and tasks. Always non-zero; rendered as 16 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u64);

impl Id {
    pub fn new(value: u64) -> Option<Self> {
        (value != 0).then_some(Self(value))
    }

    /// Draws a fresh random identifier.
    pub fn generate() -> Self {
        loop {
            let value: u64 = rand::random();
            if value != 0 {
                return Self(value);
            }
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl FromStr for Id {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ServiceError::invalid("id must not be empty"));
        }
        if s.len() != ID_LENGTH {
            return Err(ServiceError::invalid(format!(
                "id must have a length of {ID_LENGTH}"
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ServiceError::invalid(format!("invalid id {s:?}")));
        }
        let value = u64::from_str_radix(s, 16)
            .map_err(|_| ServiceError::invalid(format!("invalid id {s:?}")))?;
        Id::new(value).ok_or_else(|| ServiceError::invalid("id must not be zero"))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
