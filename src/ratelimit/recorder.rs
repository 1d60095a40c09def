//! Event recording.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use super::key::EventKeySpace;
use super::limits::Bucket;
use crate::error::Result;
use crate::store::{with_timeout, Store};

/// Writes one event per admitted request.
///
/// Events expire after the retention period; nothing ever deletes them.
pub struct EventLogger {
    store: Arc<dyn Store>,
    namespace: String,
    retention_secs: u64,
    store_timeout: Duration,
}

impl EventLogger {
    pub fn new(
        store: Arc<dyn Store>,
        namespace: impl Into<String>,
        retention_secs: u64,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            retention_secs,
            store_timeout,
        }
    }

    /// Record an admitted request for `identity` in `bucket` at `timestamp`.
    pub async fn record(&self, identity: &str, bucket: &Bucket, timestamp: f64) -> Result<()> {
        let key = EventKeySpace::new(&self.namespace, identity, bucket).event_key(timestamp);
        trace!(key = %key, ttl = self.retention_secs, "Recording event");

        with_timeout(
            self.store_timeout,
            self.store.set_with_expiry(&key, self.retention_secs, b""),
        )
        .await?;
        Ok(())
    }
}
