//! Identity resolution.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::{Result, WindowGateError};

/// What the host knows about an inbound request.
///
/// Hosts fill this from their framework's request type; the limiter only
/// reads it through an [`Identifier`].
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    remote_addr: Option<IpAddr>,
    headers: HashMap<String, String>,
}

impl RequestContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the originating address.
    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Add a header. Names are case-insensitive.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// The originating address, if known.
    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }

    /// Look up a header by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Function deriving an identity from a request.
pub type IdentifierFn = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;

/// How a check derives the identity it counts against.
#[derive(Clone)]
pub enum Identifier {
    /// Use this string for every request
    Literal(String),
    /// Compute the identity from the request
    Derived(IdentifierFn),
}

impl Identifier {
    /// Wrap a closure as a derived identifier.
    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> String + Send + Sync + 'static,
    {
        Identifier::Derived(Arc::new(f))
    }

    /// Identify requests by their originating address.
    ///
    /// Requests without an address resolve to an empty identity and are
    /// refused by [`Identifier::resolve`].
    pub fn remote_addr() -> Self {
        Self::derived(|ctx| {
            ctx.remote_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_default()
        })
    }

    /// Resolve the identity for one check.
    pub fn resolve(&self, ctx: &RequestContext) -> Result<String> {
        let identity = match self {
            Identifier::Literal(value) => value.clone(),
            Identifier::Derived(f) => f(ctx),
        };

        if identity.is_empty() {
            return Err(WindowGateError::InvalidOption(
                "identifier resolved to an empty identity".to_string(),
            ));
        }
        Ok(identity)
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::remote_addr()
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Identifier::Derived(_) => f.write_str("Derived(<fn>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_identifier() {
        let id = Identifier::Literal("service-a".to_string());
        assert_eq!(id.resolve(&RequestContext::new()).unwrap(), "service-a");
    }

    #[test]
    fn test_remote_addr_identifier() {
        let ctx = RequestContext::new().with_remote_addr("10.0.0.7".parse().unwrap());
        assert_eq!(Identifier::default().resolve(&ctx).unwrap(), "10.0.0.7");
    }

    #[test]
    fn test_missing_addr_is_rejected() {
        let result = Identifier::remote_addr().resolve(&RequestContext::new());
        assert!(matches!(result, Err(WindowGateError::InvalidOption(_))));
    }

    #[test]
    fn test_derived_identifier_reads_headers() {
        let id = Identifier::derived(|ctx| ctx.header("X-Api-Key").unwrap_or("").to_string());
        let ctx = RequestContext::new().with_header("x-api-key", "key-123");
        assert_eq!(id.resolve(&ctx).unwrap(), "key-123");
    }
}
