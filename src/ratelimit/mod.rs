//! Rate limiting logic: limits, window accounting and decisions.

mod decision;
mod identity;
mod key;
mod limiter;
mod limits;
mod options;
mod recorder;
mod window;

pub use decision::{build_headers, Decision, Exceeded, TOO_MANY_REQUESTS};
pub use identity::{Identifier, IdentifierFn, RequestContext};
pub use key::{format_timestamp, EventKeySpace};
pub use limiter::{CheckOutcome, Guard, RateLimiter};
pub use limits::{Bucket, Limit, LimitSpec, DEFAULT_BUCKET};
pub use options::{OptionValue, Options, ResolvedOptions, DEFAULT_HEADER_PREFIX};
pub use recorder::EventLogger;
pub use window::{scan_prefix, Evaluation, LimitStatus, WindowEngine};
