use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::ServiceError;

const UNITS: &[&str] = &["ns", "us", "µs", "ms", "s", "m", "h", "d", "w", "mo", "y"];

/// A schedule duration literal such as `10m`, `1h30m` or `0s`.
///
/// The literal is validated on construction and kept verbatim so rendered
/// queries and responses echo exactly what the caller supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDuration {
    literal: String,
}

impl ScheduleDuration {
    pub fn as_str(&self) -> &str {
        &self.literal
    }
}

impl FromStr for ScheduleDuration {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ServiceError::invalid(format!("invalid duration {s:?}"));
        if s.is_empty() {
            return Err(invalid());
        }

        let mut rest = s;
        while !rest.is_empty() {
            let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
            if digits == 0 {
                return Err(invalid());
            }
            rest = &rest[digits..];

            let unit_len = rest
                .char_indices()
                .find(|(_, c)| c.is_ascii_digit())
                .map(|(idx, _)| idx)
                .unwrap_or(rest.len());
            if !UNITS.contains(&&rest[..unit_len]) {
                return Err(invalid());
            }
            rest = &rest[unit_len..];
        }

        Ok(Self {
            literal: s.to_string(),
        })
    }
}

impl fmt::Display for ScheduleDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

impl Serialize for ScheduleDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.literal)
    }
}

impl<'de> Deserialize<'de> for ScheduleDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_compound_literals() {
        for literal in ["0s", "10m", "1h30m", "2mo", "1y2w", "500ms", "3µs"] {
            let parsed: ScheduleDuration = literal.parse().expect(literal);
            assert_eq!(parsed.as_str(), literal);
        }
    }

    #[test]
    fn rejects_malformed_literals() {
        for literal in ["", "10", "m", "10x", "1h30", "-5m", "1.5h"] {
            assert!(literal.parse::<ScheduleDuration>().is_err(), "{literal}");
        }
    }
}
