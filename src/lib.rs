//! Windowgate - sliding-window request admission control
//!
//! This crate decides whether a request from an identity may proceed under
//! one or more `(requests, seconds)` limits. Each admitted request is logged
//! as a timestamped key in a shared key-value store with a retention TTL;
//! checks count those keys over trailing windows, using a timestamp prefix to
//! keep the key scan bounded by recent traffic.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use config::GateConfig;
pub use error::{Result, WindowGateError};
pub use ratelimit::{CheckOutcome, Decision, Exceeded, Guard, LimitSpec, Options, RateLimiter, RequestContext};
pub use store::{MemoryStore, Store, StoreError};
