//! Limit specifications and bucket names.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Result, WindowGateError};

/// Name of the bucket used when a call site does not pick one.
pub const DEFAULT_BUCKET: &str = "default";

// Limits serialize as signed integers.
const MAX_LIMIT_VALUE: u64 = i64::MAX as u64;

/// At most `requests` events within any trailing `seconds`-second window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Limit {
    /// Events permitted per window
    pub requests: u64,
    /// Window length in seconds
    pub seconds: u64,
}

impl Limit {
    /// Create a limit, rejecting zero values and values beyond `i64::MAX`.
    pub fn new(requests: u64, seconds: u64) -> Result<Self> {
        if requests == 0 || seconds == 0 {
            return Err(WindowGateError::InvalidSpec(format!(
                "limit values must be positive, got {} requests in {} seconds",
                requests, seconds
            )));
        }
        if requests > MAX_LIMIT_VALUE || seconds > MAX_LIMIT_VALUE {
            return Err(WindowGateError::InvalidSpec(format!(
                "limit values must not exceed {}, got {} requests in {} seconds",
                MAX_LIMIT_VALUE, requests, seconds
            )));
        }
        Ok(Self { requests, seconds })
    }
}

/// An ordered, non-empty list of limits applied together to one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<i64>", into = "Vec<i64>")]
pub struct LimitSpec {
    limits: Vec<Limit>,
}

impl LimitSpec {
    /// Build a limit list from already-constructed limits.
    pub fn new(limits: Vec<Limit>) -> Result<Self> {
        if limits.is_empty() {
            return Err(WindowGateError::InvalidSpec(
                "at least one limit is required".to_string(),
            ));
        }
        Ok(Self { limits })
    }

    /// Parse a flat `requests, seconds, requests, seconds, ...` sequence.
    pub fn from_flat(values: &[i64]) -> Result<Self> {
        if values.is_empty() {
            return Err(WindowGateError::InvalidSpec(
                "at least one requests/seconds pair is required".to_string(),
            ));
        }
        if values.len() % 2 != 0 {
            return Err(WindowGateError::InvalidSpec(format!(
                "limits must come in requests/seconds pairs, got {} values",
                values.len()
            )));
        }
        if let Some(bad) = values.iter().find(|v| **v <= 0) {
            return Err(WindowGateError::InvalidSpec(format!(
                "limit values must be positive integers, got {}",
                bad
            )));
        }

        let limits = values
            .chunks(2)
            .map(|pair| Limit::new(pair[0] as u64, pair[1] as u64))
            .collect::<Result<Vec<_>>>()?;
        Self::new(limits)
    }

    /// Parse a flat JSON array of integers.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let items = value.as_array().ok_or_else(|| {
            WindowGateError::InvalidSpec(format!("expected an array of integers, got {}", value))
        })?;

        let flat = items
            .iter()
            .map(|item| {
                item.as_i64().ok_or_else(|| {
                    WindowGateError::InvalidSpec(format!("{} is not an integer", item))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_flat(&flat)
    }

    /// The limits in specification order.
    pub fn limits(&self) -> &[Limit] {
        &self.limits
    }

    /// The longest window across all limits.
    pub fn longest_window(&self) -> u64 {
        self.limits.iter().map(|l| l.seconds).max().unwrap_or(0)
    }

    /// Number of limits.
    pub fn len(&self) -> usize {
        self.limits.len()
    }

    /// Always false; a limit list holds at least one limit.
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

impl FromStr for LimitSpec {
    type Err = WindowGateError;

    /// Parse `"2,10,100,3600"`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Self::from_flat(&[]);
        }

        let flat = trimmed
            .split(',')
            .map(|token| {
                let token = token.trim();
                token.parse::<i64>().map_err(|_| {
                    WindowGateError::InvalidSpec(format!("{:?} is not an integer", token))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_flat(&flat)
    }
}

impl TryFrom<Vec<i64>> for LimitSpec {
    type Error = WindowGateError;

    fn try_from(values: Vec<i64>) -> Result<Self> {
        Self::from_flat(&values)
    }
}

impl From<LimitSpec> for Vec<i64> {
    fn from(spec: LimitSpec) -> Self {
        spec.limits
            .iter()
            .flat_map(|l| [l.requests as i64, l.seconds as i64])
            .collect()
    }
}

impl std::fmt::Display for LimitSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .limits
            .iter()
            .map(|l| format!("{}/{}s", l.requests, l.seconds))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// A named quota partition. Names match `[A-Za-z0-9-]*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bucket(String);

impl Bucket {
    /// Validate and wrap a bucket name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if let Some(bad) = name.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
            return Err(WindowGateError::InvalidSpec(format!(
                "bucket name {:?} contains {:?}; only letters, digits and '-' are allowed",
                name, bad
            )));
        }
        Ok(Self(name))
    }

    /// The bucket name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the default bucket.
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_BUCKET
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Self(DEFAULT_BUCKET.to_string())
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_from_flat_pairs() {
        let spec = LimitSpec::from_flat(&[2, 10, 100, 3600]).unwrap();
        assert_eq!(
            spec.limits(),
            &[
                Limit { requests: 2, seconds: 10 },
                Limit { requests: 100, seconds: 3600 }
            ]
        );
        assert_eq!(spec.longest_window(), 3600);
    }

    #[test]
    fn test_from_flat_rejects_malformed() {
        assert_err!(LimitSpec::from_flat(&[]));
        assert_err!(LimitSpec::from_flat(&[2, 10, 5]));
        assert_err!(LimitSpec::from_flat(&[0, 10]));
        assert_err!(LimitSpec::from_flat(&[2, -10]));
    }

    #[test]
    fn test_from_json_rejects_non_integers() {
        assert_ok!(LimitSpec::from_json(&json!([2, 10])));
        assert!(matches!(
            LimitSpec::from_json(&json!([2, "10"])),
            Err(WindowGateError::InvalidSpec(_))
        ));
        assert_err!(LimitSpec::from_json(&json!([2.5, 10])));
        assert_err!(LimitSpec::from_json(&json!({"requests": 2})));
    }

    #[test]
    fn test_parse_from_str() {
        let spec: LimitSpec = "5, 60,1000,86400".parse().unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.to_string(), "5/60s,1000/86400s");

        assert_err!("".parse::<LimitSpec>());
        assert_err!("5,abc".parse::<LimitSpec>());
    }

    #[test]
    fn test_serde_round_trip_uses_flat_form() {
        let spec: LimitSpec = serde_json::from_value(json!([3, 30])).unwrap();
        assert_eq!(serde_json::to_value(&spec).unwrap(), json!([3, 30]));
        assert!(serde_json::from_value::<LimitSpec>(json!([3])).is_err());
    }

    #[test]
    fn test_out_of_range_limits_are_rejected() {
        assert!(matches!(
            Limit::new(u64::MAX, 10),
            Err(WindowGateError::InvalidSpec(_))
        ));
        assert_err!(Limit::new(10, i64::MAX as u64 + 1));

        let widest = Limit::new(i64::MAX as u64, 10).unwrap();
        let spec = LimitSpec::new(vec![widest]).unwrap();
        let flat: Vec<i64> = spec.clone().into();
        assert_eq!(flat, vec![i64::MAX, 10]);
        assert_eq!(LimitSpec::from_flat(&flat).unwrap(), spec);

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(serde_json::from_value::<LimitSpec>(json).unwrap(), spec);
    }

    #[test]
    fn test_bucket_names() {
        assert_ok!(Bucket::new("api-v2"));
        assert_ok!(Bucket::new(""));
        assert!(Bucket::default().is_default());
        assert!(matches!(
            Bucket::new("api v2"),
            Err(WindowGateError::InvalidSpec(_))
        ));
        assert_err!(Bucket::new("a/b"));
        assert_err!(Bucket::new("ümlaut"));
    }
}
