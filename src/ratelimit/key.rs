//! Event key layout.
//!
//! Events live under `<namespace>/<identity>/<bucket>/<timestamp>`. The
//! timestamp is always the last field, so keys are parsed from the right.
//! Identities are percent-encoded for `/` and `%` so an identity can never
//! shift the field boundaries.

use crate::store::escape_glob;

use super::limits::Bucket;

/// Digits kept after the decimal point of a timestamp.
const TIMESTAMP_PRECISION: usize = 6;

/// The key space shared by all events of one identity and bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKeySpace {
    /// Everything before the timestamp, including the trailing separator
    base: String,
}

impl EventKeySpace {
    /// Build the key space for `identity` in `bucket` under `namespace`.
    pub fn new(namespace: &str, identity: &str, bucket: &Bucket) -> Self {
        Self {
            base: format!("{}/{}/{}/", namespace, encode_identity(identity), bucket),
        }
    }

    /// The store key for an event at `timestamp`.
    pub fn event_key(&self, timestamp: f64) -> String {
        format!("{}{}", self.base, format_timestamp(timestamp))
    }

    /// A glob pattern matching every event whose timestamp text starts with
    /// `timestamp_prefix`. An empty prefix matches the whole key space.
    pub fn scan_pattern(&self, timestamp_prefix: &str) -> String {
        format!("{}{}*", escape_glob(&self.base), escape_glob(timestamp_prefix))
    }

    /// Parse the timestamp of a key belonging to this key space.
    pub fn parse_timestamp(&self, key: &str) -> Option<f64> {
        key.strip_prefix(&self.base)?.parse().ok()
    }
}

impl std::fmt::Display for EventKeySpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.base.trim_end_matches('/'))
    }
}

/// Render a timestamp the way it is stored in keys.
pub fn format_timestamp(timestamp: f64) -> String {
    format!("{:.*}", TIMESTAMP_PRECISION, timestamp)
}

fn encode_identity(identity: &str) -> String {
    let mut encoded = String::with_capacity(identity.len());
    for c in identity.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            '/' => encoded.push_str("%2F"),
            c => encoded.push(c),
        }
    }
    encoded
}
