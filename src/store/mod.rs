//! Key-value store abstraction.
//!
//! The rate limiter needs two things from its backend: writing a key that
//! expires on its own, and listing keys that match a glob pattern. Pattern
//! syntax follows Redis `KEYS`: `*` matches any run of characters, `?` matches
//! one character and `\` escapes the next character.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not serve the call
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete in time
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Trait for key-value backends holding rate limit events.
#[async_trait]
pub trait Store: Send + Sync {
    /// Write `key` with `value`, evicting it after `ttl_secs` seconds.
    async fn set_with_expiry(&self, key: &str, ttl_secs: u64, value: &[u8])
        -> Result<(), StoreError>;

    /// List every live key matching `pattern`.
    async fn list_keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
}

/// Run a store call, failing with [`StoreError::Timeout`] once `limit` elapses.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

/// Escape glob metacharacters so `literal` only matches itself.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// The literal text every match of `pattern` must start with.
pub fn literal_prefix(pattern: &str) -> String {
    let mut prefix = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' | '?' | '[' => break,
            '\\' => match chars.next() {
                Some(next) => prefix.push(next),
                None => prefix.push('\\'),
            },
            c => prefix.push(c),
        }
    }
    prefix
}

/// Match `text` against a glob `pattern`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    // Position of the last `*` seen and the text index it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == t[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c => {
                    if c == t[ti] {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_pi, star_ti)) => {
                pi = star_pi + 1;
                ti = star_ti + 1;
                star = Some((star_pi, star_ti + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_star_and_question() {
        assert!(glob_match("rl/a/default/17*", "rl/a/default/1700000000.5"));
        assert!(!glob_match("rl/a/default/18*", "rl/a/default/1700000000.5"));
        assert!(glob_match("rl/?/x", "rl/a/x"));
        assert!(!glob_match("rl/?/x", "rl/ab/x"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_glob_escapes() {
        let pattern = format!("{}/*", escape_glob("we*rd?"));
        assert!(glob_match(&pattern, "we*rd?/1"));
        assert!(!glob_match(&pattern, "weXXrdY/1"));
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let limit = Duration::from_millis(10);
        let result: Result<(), StoreError> = with_timeout(limit, async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout(d)) if d == limit));
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("rl/a/default/17*"), "rl/a/default/17");
        assert_eq!(literal_prefix(&format!("{}*", escape_glob("a*b"))), "a*b");
        assert_eq!(literal_prefix("*"), "");
    }
}
