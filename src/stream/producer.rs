use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::events::CanonicalEvent;
use crate::stream::StreamBus;

/// Appends canonical events to the durable stream.
///
/// `stop` flips a sticky flag: once observed, `publish` silently drops events
/// instead of failing, so the watcher can drain without racing shutdown. A
/// publish already past the stop check may still complete; that race is
/// accepted.
pub struct StreamProducer<B: StreamBus> {
    bus: Arc<B>,
    stream: String,
    stopped: AtomicBool,
}

impl<B: StreamBus> StreamProducer<B> {
    pub fn new(bus: Arc<B>, stream: String) -> Self {
        Self {
            bus,
            stream,
            stopped: AtomicBool::new(false),
        }
    }

    /// Append one event as a flat field map with a broker-assigned id.
    /// Transport errors propagate verbatim; no batching, no retry.
    pub async fn publish(&self, event: &CanonicalEvent) -> eyre::Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            tracing::debug!(
                tx = %event.transaction_hash,
                "Producer stopped, dropping event"
            );
            return Ok(());
        }

        let entry_id = self.bus.append(&self.stream, &event.to_fields()).await?;
        tracing::debug!(
            stream = %self.stream,
            entry_id = %entry_id,
            tx = %event.transaction_hash,
            "Event published to stream"
        );
        Ok(())
    }

    /// Idempotent; safe to call concurrently with `publish`.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        tracing::info!(stream = %self.stream, "Producer stopped, publishes become no-ops");
    }
}
