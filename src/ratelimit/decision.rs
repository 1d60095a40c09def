//! Admission decisions and the response data hosts render from them.

use serde::Serialize;
use std::fmt;

use super::limits::Bucket;
use super::options::ResolvedOptions;
use super::window::Evaluation;

/// HTTP status hosts conventionally answer a rejected request with.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Details of a rejected request.
///
/// `requests` and `seconds` describe the violated limit with the longest
/// window; `retry_after` is the advisory wait before that limit frees up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exceeded {
    pub bucket: String,
    pub requests: u64,
    pub seconds: u64,
    pub retry_after: u64,
}

impl Exceeded {
    /// The `Retry-After` header for the rejection response.
    pub fn retry_after_header(&self) -> (String, String) {
        ("Retry-After".to_string(), self.retry_after.to_string())
    }

    /// The status code for the rejection response.
    pub fn status_code(&self) -> u16 {
        TOO_MANY_REQUESTS
    }
}

impl fmt::Display for Exceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bucket.is_empty() || self.bucket == super::limits::DEFAULT_BUCKET {
            write!(f, "Rate limit exceeded")?;
        } else {
            write!(f, "{} rate limit exceeded", capitalize(&self.bucket))?;
        }
        write!(
            f,
            ": {} requests in {} seconds. Try again in {} seconds.",
            self.requests, self.seconds, self.retry_after
        )
    }
}

impl std::error::Error for Exceeded {}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Outcome of one rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Admitted,
    Exceeded(Exceeded),
}

impl Decision {
    /// Turn an evaluation into a decision.
    pub fn decide(bucket: &Bucket, evaluation: &Evaluation) -> Self {
        match evaluation.violated {
            Some(status) => Decision::Exceeded(Exceeded {
                bucket: bucket.to_string(),
                requests: status.limit.requests,
                seconds: status.limit.seconds,
                retry_after: status.reset_in,
            }),
            None => Decision::Admitted,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted)
    }

    /// `Err` with the rejection details when the request was not admitted.
    pub fn into_result(self) -> Result<(), Exceeded> {
        match self {
            Decision::Admitted => Ok(()),
            Decision::Exceeded(exceeded) => Err(exceeded),
        }
    }
}

/// Rate limit headers for an evaluation.
///
/// Three headers per limit, in specification order:
/// `<prefix>[-<bucket>][-<n>]-Limit`, `-Remaining` and `-Reset`. The bucket
/// part is left out for the default and empty buckets and `<n>` only appears when there
/// is more than one limit.
pub fn build_headers(
    bucket: &Bucket,
    evaluation: &Evaluation,
    options: &ResolvedOptions,
) -> Vec<(String, String)> {
    if !options.send_headers {
        return Vec::new();
    }

    let mut base = options.header_prefix.clone();
    if !bucket.is_default() && !bucket.as_str().is_empty() {
        base.push('-');
        base.push_str(bucket.as_str());
    }

    let numbered = evaluation.statuses.len() > 1;
    let mut headers = Vec::with_capacity(evaluation.statuses.len() * 3);
    for (i, status) in evaluation.statuses.iter().enumerate() {
        let name = if numbered {
            format!("{}-{}", base, i + 1)
        } else {
            base.clone()
        };
        headers.push((format!("{}-Limit", name), status.limit.requests.to_string()));
        headers.push((format!("{}-Remaining", name), status.remaining.to_string()));
        headers.push((format!("{}-Reset", name), status.reset_in.to_string()));
    }
    headers
}
