//! Sliding-window accounting over stored event timestamps.
//!
//! Every admitted request leaves one key whose last field is its timestamp.
//! To count the events of a window the engine lists the keys of one
//! identity+bucket and filters their timestamps. Listing is narrowed with a
//! scan prefix: the leading digits every timestamp inside the longest window
//! shares with the current time. Scan cost then follows the traffic inside
//! that window instead of everything still retained.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use super::key::EventKeySpace;
use super::limits::{Bucket, Limit, LimitSpec};
use crate::clock::Clock;
use crate::error::Result;
use crate::store::{with_timeout, Store};

/// The state of one limit at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LimitStatus {
    /// The limit evaluated
    pub limit: Limit,
    /// Events counted inside the window
    pub count: u64,
    /// Events still permitted in the window
    pub remaining: u64,
    /// Seconds until the oldest counted event leaves the window, 0 if none
    pub reset_in: u64,
}

impl LimitStatus {
    fn is_violated(&self) -> bool {
        self.remaining < 1
    }
}

/// Result of evaluating a limit specification for one identity and bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Time the evaluation was made at
    pub now: f64,
    /// One status per limit, in specification order
    pub statuses: Vec<LimitStatus>,
    /// The violated limit with the longest window
    pub violated: Option<LimitStatus>,
}

impl Evaluation {
    /// Build an evaluation from a candidate history.
    pub fn from_history(spec: &LimitSpec, history: &[f64], now: f64) -> Self {
        let statuses: Vec<LimitStatus> = spec
            .limits()
            .iter()
            .map(|limit| evaluate_limit(*limit, history, now))
            .collect();

        // Largest window wins; among equal windows the later one does.
        let violated = statuses
            .iter()
            .filter(|s| s.is_violated())
            .fold(None::<LimitStatus>, |best, s| match best {
                Some(b) if b.limit.seconds > s.limit.seconds => Some(b),
                _ => Some(*s),
            });

        Self {
            now,
            statuses,
            violated,
        }
    }

    /// The state as seen right after one more event is recorded at `now`.
    pub fn with_admitted(mut self) -> Self {
        for status in &mut self.statuses {
            if status.count == 0 {
                status.reset_in = status.limit.seconds;
            }
            status.count += 1;
            status.remaining = status.remaining.saturating_sub(1);
        }
        self
    }
}

fn evaluate_limit(limit: Limit, history: &[f64], now: f64) -> LimitStatus {
    let window_start = now - limit.seconds as f64;
    let (count, oldest) = history
        .iter()
        .filter(|t| **t > window_start)
        .fold((0u64, None::<f64>), |(count, oldest), t| {
            (count + 1, Some(oldest.map_or(*t, |o| o.min(*t))))
        });

    let reset_in = match oldest {
        Some(oldest) => {
            let age = (now - oldest).floor().max(0.0) as u64;
            limit.seconds.saturating_sub(age)
        }
        None => 0,
    };

    LimitStatus {
        limit,
        count,
        remaining: limit.requests.saturating_sub(count),
        reset_in,
    }
}

/// The leading digits shared by every whole-second timestamp in the
/// `window` seconds up to `now`.
///
/// Empty when the window start is before the epoch or has fewer digits than
/// `now`, in which case the whole key space has to be scanned.
pub fn scan_prefix(now: f64, window: u64) -> String {
    let start = (now - window as f64).floor();
    if start < 0.0 || now < 0.0 {
        return String::new();
    }

    let end = (now.floor() as u64).to_string();
    let start = (start as u64).to_string();
    if start.len() != end.len() {
        return String::new();
    }

    end.chars()
        .zip(start.chars())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a)
        .collect()
}

/// Evaluates limit specifications against the event log in a [`Store`].
pub struct WindowEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    namespace: String,
    store_timeout: Duration,
}

impl WindowEngine {
    /// Create an engine reading events under `namespace`.
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        namespace: impl Into<String>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            namespace: namespace.into(),
            store_timeout,
        }
    }

    /// Evaluate `spec` for `identity` in `bucket` at the current time.
    pub async fn evaluate(
        &self,
        identity: &str,
        bucket: &Bucket,
        spec: &LimitSpec,
    ) -> Result<Evaluation> {
        self.evaluate_at(identity, bucket, spec, self.clock.now()).await
    }

    /// Evaluate `spec` for `identity` in `bucket` as of `now`.
    pub async fn evaluate_at(
        &self,
        identity: &str,
        bucket: &Bucket,
        spec: &LimitSpec,
        now: f64,
    ) -> Result<Evaluation> {
        let space = EventKeySpace::new(&self.namespace, identity, bucket);
        let prefix = scan_prefix(now, spec.longest_window());
        let history = self.history(&space, &prefix).await?;

        trace!(
            key_space = %space,
            prefix = %prefix,
            candidates = history.len(),
            "Evaluating rate limits"
        );

        Ok(Evaluation::from_history(spec, &history, now))
    }

    /// Timestamps of the events in `space` whose text starts with `prefix`.
    pub(crate) async fn history(&self, space: &EventKeySpace, prefix: &str) -> Result<Vec<f64>> {
        let pattern = space.scan_pattern(prefix);
        let keys = with_timeout(self.store_timeout, self.store.list_keys_matching(&pattern)).await?;

        Ok(keys
            .iter()
            .filter_map(|key| space.parse_timestamp(key))
            .collect())
    }

    /// The clock this engine reads.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::WindowGateError;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    const START: f64 = 1_712_345_678.0;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        engine: WindowEngine,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let engine = WindowEngine::new(
            store.clone(),
            clock.clone(),
            "rl",
            Duration::from_secs(1),
        );
        Fixture {
            clock,
            store,
            engine,
        }
    }

    async fn put(fx: &Fixture, identity: &str, bucket: &Bucket, timestamp: f64) {
        let key = EventKeySpace::new("rl", identity, bucket).event_key(timestamp);
        fx.store.set_with_expiry(&key, 86_400, b"").await.unwrap();
    }

    #[test]
    fn test_scan_prefix() {
        assert_eq!(scan_prefix(START, 60), "17123456");
        assert_eq!(scan_prefix(START, 3600), "171234");
        assert_eq!(scan_prefix(1_700_000_555.0, 10), "17000005");
        // A window crossing a power-of-ten boundary still shares the first digit.
        assert_eq!(scan_prefix(1_700_000_000.5, 10), "1");
    }

    #[test]
    fn test_scan_prefix_degenerate() {
        // Window start has fewer digits than now.
        assert_eq!(scan_prefix(START, 1_000_000_000), "");
        // Window start is before the epoch.
        assert_eq!(scan_prefix(100.0, 1000), "");
        assert_eq!(scan_prefix(1000.2, 1), "");
    }

    #[test]
    fn test_scan_prefix_covers_window() {
        for window in [1, 7, 60, 999, 3600, 86_400, 31_536_000] {
            let prefix = scan_prefix(START, window);
            let mut t = START - window as f64 + 0.5;
            while t <= START {
                assert!(
                    (t.floor() as u64).to_string().starts_with(&prefix),
                    "{} not under prefix {:?} for window {}",
                    t,
                    prefix,
                    window
                );
                t += (window as f64 / 50.0).max(1.0);
            }
        }
    }

    #[test]
    fn test_evaluation_counts_each_window() {
        let spec = LimitSpec::from_flat(&[3, 10, 5, 100]).unwrap();
        let now = 1000.0;
        let history = [905.0, 950.0, 995.0, 999.0];

        let eval = Evaluation::from_history(&spec, &history, now);
        assert_eq!(eval.statuses[0].count, 2);
        assert_eq!(eval.statuses[0].remaining, 1);
        assert_eq!(eval.statuses[0].reset_in, 5);
        assert_eq!(eval.statuses[1].count, 4);
        assert_eq!(eval.statuses[1].remaining, 1);
        assert_eq!(eval.statuses[1].reset_in, 5);
        assert!(eval.violated.is_none());
    }

    #[test]
    fn test_most_restrictive_violation_has_longest_window() {
        let spec = LimitSpec::from_flat(&[1, 10, 2, 60, 100, 3600]).unwrap();
        let eval = Evaluation::from_history(&spec, &[990.0, 995.0], 1000.0);

        let violated = eval.violated.unwrap();
        assert_eq!(violated.limit, Limit { requests: 2, seconds: 60 });
        assert_eq!(violated.reset_in, 50);
    }

    #[test]
    fn test_equal_windows_prefer_last() {
        let spec = LimitSpec::from_flat(&[1, 10, 2, 10]).unwrap();
        let eval = Evaluation::from_history(&spec, &[995.0, 996.0], 1000.0);
        assert_eq!(eval.violated.unwrap().limit.requests, 2);
    }

    #[test]
    fn test_empty_window_has_no_reset() {
        let spec = LimitSpec::from_flat(&[1, 10]).unwrap();
        let eval = Evaluation::from_history(&spec, &[500.0], 1000.0);
        assert_eq!(eval.statuses[0].count, 0);
        assert_eq!(eval.statuses[0].reset_in, 0);

        let admitted = eval.with_admitted();
        assert_eq!(admitted.statuses[0].remaining, 0);
        assert_eq!(admitted.statuses[0].reset_in, 10);
    }

    #[tokio::test]
    async fn test_engine_reads_store() {
        let fx = fixture();
        let bucket = Bucket::default();
        let spec = LimitSpec::from_flat(&[2, 10]).unwrap();

        put(&fx, "10.0.0.1", &bucket, START - 5.0).await;
        put(&fx, "10.0.0.1", &bucket, START - 1.0).await;

        let eval = fx.engine.evaluate("10.0.0.1", &bucket, &spec).await.unwrap();
        assert_eq!(eval.statuses[0].remaining, 0);
        assert_eq!(eval.violated.unwrap().reset_in, 5);
    }

    #[tokio::test]
    async fn test_evaluate_is_idempotent() {
        let fx = fixture();
        let bucket = Bucket::default();
        let spec = LimitSpec::from_flat(&[5, 60]).unwrap();
        put(&fx, "a", &bucket, START - 30.0).await;

        let first = fx.engine.evaluate("a", &bucket, &spec).await.unwrap();
        let second = fx.engine.evaluate("a", &bucket, &spec).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_prefix_excludes_old_history() {
        let fx = fixture();
        let bucket = Bucket::default();
        put(&fx, "a", &bucket, START - 5.0).await;
        put(&fx, "a", &bucket, START - 50_000.0).await;

        let space = EventKeySpace::new("rl", "a", &bucket);
        let narrowed = fx
            .engine
            .history(&space, &scan_prefix(START, 60))
            .await
            .unwrap();
        assert_eq!(narrowed, vec![START - 5.0]);

        let full = fx.engine.history(&space, "").await.unwrap();
        assert_eq!(full.len(), 2);
    }

    #[tokio::test]
    async fn test_window_slides_with_time() {
        let fx = fixture();
        let bucket = Bucket::default();
        let spec = LimitSpec::from_flat(&[1, 10]).unwrap();
        put(&fx, "a", &bucket, START).await;

        let mut last = u64::MAX;
        for _ in 0..9 {
            fx.clock.advance(1.0);
            let eval = fx.engine.evaluate("a", &bucket, &spec).await.unwrap();
            let reset_in = eval.violated.unwrap().reset_in;
            assert!(reset_in <= last);
            last = reset_in;
        }
        assert_eq!(last, 1);

        fx.clock.advance(1.0);
        let eval = fx.engine.evaluate("a", &bucket, &spec).await.unwrap();
        assert!(eval.violated.is_none());
    }

    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn set_with_expiry(&self, _: &str, _: u64, _: &[u8]) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn list_keys_matching(&self, _: &str) -> std::result::Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let engine = WindowEngine::new(
            Arc::new(FailingStore),
            Arc::new(ManualClock::new(START)),
            "rl",
            Duration::from_secs(1),
        );
        let spec = LimitSpec::from_flat(&[1, 10]).unwrap();

        let result = engine.evaluate("a", &Bucket::default(), &spec).await;
        assert!(matches!(
            result,
            Err(WindowGateError::Store(StoreError::Unavailable(_)))
        ));
    }
}
