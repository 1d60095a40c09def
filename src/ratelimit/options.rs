//! Per-call-site options.

use std::collections::HashMap;

use super::identity::Identifier;
use crate::error::{Result, WindowGateError};

/// Header prefix used when none is configured.
pub const DEFAULT_HEADER_PREFIX: &str = "X-RateLimit";

/// A loosely typed option value, as handed over by a host's option map.
#[derive(Debug, Clone)]
pub enum OptionValue {
    Bool(bool),
    Text(String),
    Identifier(Identifier),
}

/// Options for one call site. Unset fields fall back to the limiter defaults.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Emit rate limit headers
    pub send_headers: Option<bool>,
    /// Prefix for emitted header names
    pub header_prefix: Option<String>,
    /// How to derive the identity
    pub identifier: Option<Identifier>,
}

impl Options {
    /// Options that defer everything to the limiter defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn rate limit headers on or off.
    pub fn with_send_headers(mut self, send: bool) -> Self {
        self.send_headers = Some(send);
        self
    }

    /// Set the prefix for emitted header names.
    pub fn with_header_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.header_prefix = Some(prefix.into());
        self
    }

    /// Set how the identity is derived.
    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Validate an option map whose keys are `send_headers`,
    /// `header_prefix` and `identifier`.
    pub fn from_map<I>(map: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, OptionValue)>,
    {
        let mut options = Options::new();
        for (key, value) in map {
            match (key.as_str(), value) {
                ("send_headers", OptionValue::Bool(send)) => options.send_headers = Some(send),
                ("header_prefix", OptionValue::Text(prefix)) => {
                    options.header_prefix = Some(prefix)
                }
                ("identifier", OptionValue::Text(literal)) => {
                    options.identifier = Some(Identifier::Literal(literal))
                }
                ("identifier", OptionValue::Identifier(identifier)) => {
                    options.identifier = Some(identifier)
                }
                ("send_headers", other) => {
                    return Err(wrong_type("send_headers", "a boolean", &other))
                }
                ("header_prefix", other) => {
                    return Err(wrong_type("header_prefix", "a string", &other))
                }
                ("identifier", other) => {
                    return Err(wrong_type("identifier", "a string or function", &other))
                }
                (unknown, _) => {
                    return Err(WindowGateError::InvalidOption(format!(
                        "unrecognized option {:?}",
                        unknown
                    )))
                }
            }
        }
        options.validate()?;
        Ok(options)
    }

    /// Validate a JSON object of options. Identifiers can only be literals here.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            WindowGateError::InvalidOption(format!("expected an object of options, got {}", value))
        })?;

        let mut map = HashMap::with_capacity(object.len());
        for (key, value) in object {
            let value = match value {
                serde_json::Value::Bool(b) => OptionValue::Bool(*b),
                serde_json::Value::String(s) => OptionValue::Text(s.clone()),
                other => {
                    return Err(WindowGateError::InvalidOption(format!(
                        "option {:?} has unsupported value {}",
                        key, other
                    )))
                }
            };
            map.insert(key.clone(), value);
        }
        Self::from_map(map)
    }

    /// Check values that typing alone cannot rule out.
    pub fn validate(&self) -> Result<()> {
        if let Some(prefix) = &self.header_prefix {
            if prefix.is_empty() {
                return Err(WindowGateError::InvalidOption(
                    "header_prefix must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Fill unset fields from `defaults`.
    pub fn resolve(&self, defaults: &ResolvedOptions) -> ResolvedOptions {
        ResolvedOptions {
            send_headers: self.send_headers.unwrap_or(defaults.send_headers),
            header_prefix: self
                .header_prefix
                .clone()
                .unwrap_or_else(|| defaults.header_prefix.clone()),
            identifier: self
                .identifier
                .clone()
                .unwrap_or_else(|| defaults.identifier.clone()),
        }
    }
}

fn wrong_type(key: &str, expected: &str, got: &OptionValue) -> WindowGateError {
    WindowGateError::InvalidOption(format!("option {:?} must be {}, got {:?}", key, expected, got))
}

/// Options with every field decided.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub send_headers: bool,
    pub header_prefix: String,
    pub identifier: Identifier,
}

impl Default for ResolvedOptions {
    fn default() -> Self {
        Self {
            send_headers: true,
            header_prefix: DEFAULT_HEADER_PREFIX.to_string(),
            identifier: Identifier::default(),
        }
    }
}
