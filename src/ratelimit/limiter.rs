//! Core rate limiter implementation.
//!
//! A check evaluates the limits of one call site against the event history
//! of the request's identity, and records a new event when the request is
//! admitted.
//!
//! Checks are best effort. Nothing locks the history between evaluation and
//! recording, so concurrent requests for the same identity and bucket can
//! all be admitted on a history that lacks each other's events. Under that
//! kind of burst a limit can be overshot by the number of requests in flight.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace};

use super::decision::{build_headers, Decision};
use super::identity::{Identifier, RequestContext};
use super::limits::{Bucket, LimitSpec};
use super::options::{Options, ResolvedOptions};
use super::recorder::EventLogger;
use super::window::{Evaluation, WindowEngine};
use crate::clock::{Clock, SystemClock};
use crate::config::GateConfig;
use crate::error::Result;
use crate::store::Store;

/// A registered call site: a bucket, its limits and its options.
///
/// Built through [`RateLimiter::guard`], which validates everything up front
/// so a misconfigured call site fails when it is registered rather than on
/// its first request.
#[derive(Debug, Clone)]
pub struct Guard {
    bucket: Bucket,
    limits: LimitSpec,
    options: ResolvedOptions,
}

impl Guard {
    /// The bucket this call site counts against.
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// The limits enforced at this call site.
    pub fn limits(&self) -> &LimitSpec {
        &self.limits
    }
}

/// Everything a host needs to answer a checked request.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    /// Admit or reject
    pub decision: Decision,
    /// Rate limit headers to attach to the response
    pub headers: Vec<(String, String)>,
    /// Per-limit state, absent when limiting is inactive
    pub evaluation: Option<Evaluation>,
}

impl CheckOutcome {
    fn inactive() -> Self {
        Self {
            decision: Decision::Admitted,
            headers: Vec::new(),
            evaluation: None,
        }
    }
}

/// The rate limiter.
///
/// This struct is thread-safe and can be shared across tasks behind an `Arc`.
pub struct RateLimiter {
    config: GateConfig,
    defaults: ResolvedOptions,
    engine: WindowEngine,
    logger: EventLogger,
}

impl RateLimiter {
    /// Create a rate limiter over `store` using wall-clock time.
    pub fn new(config: GateConfig, store: Arc<dyn Store>) -> Result<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a rate limiter over `store` reading time from `clock`.
    pub fn with_clock(
        config: GateConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let timeout = Duration::from_millis(config.store_timeout_ms);
        let engine = WindowEngine::new(store.clone(), clock, config.namespace.clone(), timeout);
        let logger = EventLogger::new(
            store,
            config.namespace.clone(),
            config.retention_secs,
            timeout,
        );
        let defaults = ResolvedOptions {
            send_headers: config.send_headers,
            header_prefix: config.header_prefix.clone(),
            identifier: Identifier::default(),
        };

        Ok(Self {
            config,
            defaults,
            engine,
            logger,
        })
    }

    /// Replace the identifier used by call sites that do not set one.
    ///
    /// Guards registered before this call keep the identifier they resolved.
    pub fn with_default_identifier(mut self, identifier: Identifier) -> Self {
        self.defaults.identifier = identifier;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Register a call site.
    ///
    /// `limits` falls back to the configured default limits.
    pub fn guard(&self, bucket: &str, limits: Option<LimitSpec>, options: Options) -> Result<Guard> {
        let bucket = Bucket::new(bucket)?;
        let limits = limits.unwrap_or_else(|| self.config.default_limits.clone());
        self.config.check_retention(&limits)?;
        options.validate()?;

        debug!(bucket = %bucket, limits = %limits, "Registered rate limit");

        Ok(Guard {
            bucket,
            limits,
            options: options.resolve(&self.defaults),
        })
    }

    /// Check a request against a registered call site.
    ///
    /// Admitted requests are recorded; their reported state already counts
    /// the recorded event.
    pub async fn check(&self, ctx: &RequestContext, guard: &Guard) -> Result<CheckOutcome> {
        if !self.config.is_active() {
            trace!(
                enabled = self.config.enabled,
                environment = %self.config.environment,
                "Rate limiting inactive, admitting"
            );
            return Ok(CheckOutcome::inactive());
        }

        let identity = guard.options.identifier.resolve(ctx)?;
        let now = self.engine.clock().now();

        let evaluation = self
            .engine
            .evaluate_at(&identity, &guard.bucket, &guard.limits, now)
            .await?;
        let decision = Decision::decide(&guard.bucket, &evaluation);

        let evaluation = match &decision {
            Decision::Admitted => {
                self.logger.record(&identity, &guard.bucket, now).await?;
                evaluation.with_admitted()
            }
            Decision::Exceeded(exceeded) => {
                debug!(
                    identity = %identity,
                    bucket = %guard.bucket,
                    requests = exceeded.requests,
                    seconds = exceeded.seconds,
                    retry_after = exceeded.retry_after,
                    "Rate limit exceeded"
                );
                evaluation
            }
        };

        let headers = build_headers(&guard.bucket, &evaluation, &guard.options);
        Ok(CheckOutcome {
            decision,
            headers,
            evaluation: Some(evaluation),
        })
    }

    /// Register and check in one step.
    pub async fn check_rate_limit(
        &self,
        ctx: &RequestContext,
        bucket: &str,
        limits: Option<LimitSpec>,
        options: Options,
    ) -> Result<CheckOutcome> {
        let guard = self.guard(bucket, limits, options)?;
        self.check(ctx, &guard).await
    }

    /// Evaluate a call site without recording anything.
    pub async fn peek(&self, ctx: &RequestContext, guard: &Guard) -> Result<Evaluation> {
        let identity = guard.options.identifier.resolve(ctx)?;
        self.engine
            .evaluate(&identity, &guard.bucket, &guard.limits)
            .await
    }
}
