use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RedisConfig;
use crate::events::CanonicalEvent;
use crate::store::EventStore;
use crate::stream::{StreamBus, StreamEntry};

/// Entries pulled per group read.
const READ_BATCH_SIZE: usize = 10;
/// Fixed backoff after a read-transport error.
const READ_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Reads the stream through a named consumer group and persists each entry.
///
/// Delivery is at-least-once: an entry is acknowledged only after it has been
/// persisted or dead-lettered, so a crash between save and ack can produce a
/// duplicate row but never a silent loss.
pub struct StreamConsumer<B: StreamBus, S: EventStore> {
    bus: Arc<B>,
    store: Arc<S>,
    stream: String,
    dlq_stream: String,
    group: String,
    consumer_id: String,
    shutdown: CancellationToken,
}

impl<B: StreamBus, S: EventStore> StreamConsumer<B, S> {
    /// Bind to the consumer group, creating it (and the stream) if absent.
    /// Any group-creation error other than "already exists" is fatal here.
    pub async fn new(
        bus: Arc<B>,
        store: Arc<S>,
        config: &RedisConfig,
        shutdown: CancellationToken,
    ) -> eyre::Result<Self> {
        bus.ensure_group(&config.stream, &config.group).await?;

        Ok(Self {
            bus,
            store,
            stream: config.stream.clone(),
            dlq_stream: config.dlq_stream.clone(),
            group: config.group.clone(),
            consumer_id: config.consumer.clone(),
            shutdown,
        })
    }

    /// Cooperative stop; observed once per loop iteration before the next
    /// read, so latency is bounded by one poll or one in-flight batch.
    /// Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Read loop. Runs until `stop` is observed; an in-flight batch is always
    /// finished before the loop exits.
    pub async fn run(&self) {
        tracing::info!(
            stream = %self.stream,
            group = %self.group,
            consumer = %self.consumer_id,
            "Consumer started"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let entries = match self
                .bus
                .read_group(&self.stream, &self.group, &self.consumer_id, READ_BATCH_SIZE)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!(error = %e, "Error reading from stream, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(READ_RETRY_DELAY) => {}
                        _ = self.shutdown.cancelled() => {}
                    }
                    continue;
                }
            };

            for entry in entries {
                self.process_entry(entry).await;
            }
        }

        tracing::info!(group = %self.group, "Consumer stopped");
    }

    /// Settle one entry: persist it or dead-letter it, then acknowledge.
    /// A malformed or unpersistable entry never stops the loop.
    async fn process_entry(&self, entry: StreamEntry) {
        let settled = match CanonicalEvent::from_fields(&entry.fields) {
            Err(e) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    error = %e,
                    "Malformed stream entry, moving to dead-letter stream"
                );
                self.move_to_dlq(&entry).await
            }
            Ok(event) => match self.store.save(&event).await {
                Err(e) => {
                    tracing::error!(
                        entry_id = %entry.id,
                        tx = %event.transaction_hash,
                        error = %e,
                        "Failed to persist event, moving to dead-letter stream"
                    );
                    self.move_to_dlq(&entry).await
                }
                Ok(()) => {
                    tracing::debug!(
                        entry_id = %entry.id,
                        tx = %event.transaction_hash,
                        "Event persisted"
                    );
                    true
                }
            },
        };

        // Unsettled entries stay pending and will be redelivered.
        if !settled {
            return;
        }

        if let Err(e) = self.bus.ack(&self.stream, &self.group, &entry.id).await {
            tracing::error!(
                entry_id = %entry.id,
                error = %e,
                "Failed to acknowledge entry; it may be redelivered"
            );
        }
    }

    /// Forward the original raw fields to the dead-letter stream. Returns
    /// whether the entry's fate is settled.
    async fn move_to_dlq(&self, entry: &StreamEntry) -> bool {
        match self.bus.append(&self.dlq_stream, &entry.fields).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    entry_id = %entry.id,
                    dlq = %self.dlq_stream,
                    error = %e,
                    "Failed to move entry to dead-letter stream"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves scripted batches; cancels the shutdown token once drained so
    /// `run` terminates. Records dead-letter appends and acks, and can be
    /// told to fail appends or the next N reads.
    struct ScriptedBus {
        batches: Mutex<VecDeque<Vec<StreamEntry>>>,
        dead_lettered: Mutex<Vec<StreamEntry>>,
        acked: Mutex<Vec<String>>,
        shutdown: CancellationToken,
        group_error: Option<String>,
        append_fails: AtomicBool,
        read_failures: AtomicUsize,
    }

    impl ScriptedBus {
        fn new(batches: Vec<Vec<StreamEntry>>, shutdown: CancellationToken) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                dead_lettered: Mutex::new(Vec::new()),
                acked: Mutex::new(Vec::new()),
                shutdown,
                group_error: None,
                append_fails: AtomicBool::new(false),
                read_failures: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StreamBus for ScriptedBus {
        async fn append(
            &self,
            _stream: &str,
            fields: &[(String, String)],
        ) -> eyre::Result<String> {
            if self.append_fails.load(Ordering::SeqCst) {
                return Err(eyre::eyre!("dead-letter stream unreachable"));
            }
            let mut dead_lettered = self.dead_lettered.lock().unwrap();
            let id = format!("dlq-{}", dead_lettered.len());
            dead_lettered.push(StreamEntry {
                id,
                fields: fields.to_vec(),
            });
            Ok("dlq-id".to_string())
        }

        async fn ensure_group(&self, _stream: &str, _group: &str) -> eyre::Result<()> {
            match &self.group_error {
                Some(msg) => Err(eyre::eyre!("{}", msg.clone())),
                None => Ok(()),
            }
        }

        async fn read_group(
            &self,
            _stream: &str,
            _group: &str,
            _consumer: &str,
            _count: usize,
        ) -> eyre::Result<Vec<StreamEntry>> {
            if self.read_failures.load(Ordering::SeqCst) > 0 {
                self.read_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(eyre::eyre!("read transport failure"));
            }
            let next = self.batches.lock().unwrap().pop_front();
            match next {
                Some(batch) => Ok(batch),
                None => {
                    self.shutdown.cancel();
                    Ok(Vec::new())
                }
            }
        }

        async fn ack(&self, _stream: &str, _group: &str, entry_id: &str) -> eyre::Result<()> {
            self.acked.lock().unwrap().push(entry_id.to_string());
            Ok(())
        }
    }

    /// Saves into memory; fails for events whose token is "FAIL".
    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<CanonicalEvent>>,
    }

    #[async_trait]
    impl EventStore for MemoryStore {
        async fn save(&self, event: &CanonicalEvent) -> eyre::Result<()> {
            if event.token == "FAIL" {
                return Err(eyre::eyre!("store write failure"));
            }
            self.saved.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn get_all(
            &self,
            _last_id: i64,
            _limit: i64,
            _currency: &str,
        ) -> eyre::Result<Vec<crate::events::StoredEvent>> {
            Ok(Vec::new())
        }
    }

    fn redis_config() -> RedisConfig {
        RedisConfig {
            url: "redis://localhost".to_string(),
            stream: "events".to_string(),
            dlq_stream: "events_dlq".to_string(),
            group: "group".to_string(),
            consumer: "c1".to_string(),
        }
    }

    fn entry(id: &str, token: &str) -> StreamEntry {
        let event = CanonicalEvent {
            token: token.to_string(),
            amount: "1000".to_string(),
            from_chain: "0x11".to_string(),
            to_chain: "0x22".to_string(),
            transaction_hash: format!("0xtx-{}", id),
            timestamp: Utc::now(),
        };
        StreamEntry {
            id: id.to_string(),
            fields: event.to_fields(),
        }
    }

    fn malformed_entry(id: &str) -> StreamEntry {
        StreamEntry {
            id: id.to_string(),
            fields: vec![("garbage".to_string(), "value".to_string())],
        }
    }

    async fn run_consumer(
        batches: Vec<Vec<StreamEntry>>,
    ) -> (Arc<ScriptedBus>, Arc<MemoryStore>) {
        let shutdown = CancellationToken::new();
        let bus = Arc::new(ScriptedBus::new(batches, shutdown.clone()));
        let store = Arc::new(MemoryStore::default());
        let consumer =
            StreamConsumer::new(bus.clone(), store.clone(), &redis_config(), shutdown)
                .await
                .unwrap();

        consumer.run().await;
        (bus, store)
    }

    #[tokio::test]
    async fn test_drains_batch_persisting_every_entry() {
        let (bus, store) =
            run_consumer(vec![vec![entry("1-0", "ETH"), entry("1-1", "DAI")]]).await;

        assert_eq!(store.saved.lock().unwrap().len(), 2);
        assert!(bus.dead_lettered.lock().unwrap().is_empty());
        assert_eq!(*bus.acked.lock().unwrap(), vec!["1-0", "1-1"]);
    }

    #[tokio::test]
    async fn test_malformed_entry_dead_lettered_and_loop_continues() {
        let (bus, store) =
            run_consumer(vec![vec![malformed_entry("1-0"), entry("1-1", "ETH")]]).await;

        // The bad entry keeps its original raw fields on the DLQ.
        let dead_lettered = bus.dead_lettered.lock().unwrap();
        assert_eq!(dead_lettered.len(), 1);
        assert_eq!(dead_lettered[0].fields[0].0, "garbage");

        // The next entry in the batch is still persisted and both are acked.
        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert_eq!(*bus.acked.lock().unwrap(), vec!["1-0", "1-1"]);
    }

    #[tokio::test]
    async fn test_persist_failure_dead_letters_then_acks() {
        let (bus, store) = run_consumer(vec![vec![entry("1-0", "FAIL")]]).await;

        assert!(store.saved.lock().unwrap().is_empty());
        assert_eq!(bus.dead_lettered.lock().unwrap().len(), 1);
        assert_eq!(*bus.acked.lock().unwrap(), vec!["1-0"]);
    }

    #[tokio::test]
    async fn test_every_entry_persisted_or_dead_lettered_never_both() {
        let batches = vec![
            vec![entry("1-0", "ETH"), entry("1-1", "FAIL"), malformed_entry("1-2")],
            vec![entry("2-0", "USDT")],
        ];
        let (bus, store) = run_consumer(batches).await;

        let saved = store.saved.lock().unwrap().len();
        let dead_lettered = bus.dead_lettered.lock().unwrap().len();
        assert_eq!(saved, 2);
        assert_eq!(dead_lettered, 2);
        assert_eq!(saved + dead_lettered, 4);
        assert_eq!(bus.acked.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_read_error_retries_without_acking() {
        let shutdown = CancellationToken::new();
        let bus = Arc::new(ScriptedBus::new(
            vec![vec![entry("1-0", "ETH")]],
            shutdown.clone(),
        ));
        bus.read_failures.store(1, Ordering::SeqCst);
        let store = Arc::new(MemoryStore::default());
        let consumer =
            StreamConsumer::new(bus.clone(), store.clone(), &redis_config(), shutdown)
                .await
                .unwrap();

        consumer.run().await;

        // The failed read advanced and acked nothing; the retry after the
        // backoff still delivered and settled the batch.
        assert_eq!(bus.read_failures.load(Ordering::SeqCst), 0);
        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert_eq!(*bus.acked.lock().unwrap(), vec!["1-0"]);
    }

    #[tokio::test]
    async fn test_dlq_append_failure_leaves_entry_unacked() {
        let shutdown = CancellationToken::new();
        let bus = Arc::new(ScriptedBus::new(
            vec![vec![malformed_entry("1-0")]],
            shutdown.clone(),
        ));
        bus.append_fails.store(true, Ordering::SeqCst);
        let store = Arc::new(MemoryStore::default());
        let consumer =
            StreamConsumer::new(bus.clone(), store.clone(), &redis_config(), shutdown)
                .await
                .unwrap();

        consumer.run().await;

        // Fate never settled: no ack, so the group will redeliver the entry.
        assert!(bus.acked.lock().unwrap().is_empty());
        assert!(bus.dead_lettered.lock().unwrap().is_empty());
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_before_run_exits_immediately() {
        let shutdown = CancellationToken::new();
        let bus = Arc::new(ScriptedBus::new(
            vec![vec![entry("1-0", "ETH")]],
            shutdown.clone(),
        ));
        let store = Arc::new(MemoryStore::default());
        let consumer =
            StreamConsumer::new(bus.clone(), store.clone(), &redis_config(), shutdown)
                .await
                .unwrap();

        consumer.stop();
        consumer.stop(); // idempotent
        consumer.run().await;

        // Nothing was read after the stop was observed.
        assert!(store.saved.lock().unwrap().is_empty());
        assert!(bus.acked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_group_creation_error_is_fatal_at_construction() {
        let shutdown = CancellationToken::new();
        let mut bus = ScriptedBus::new(vec![], shutdown.clone());
        bus.group_error = Some("NOPERM access denied".to_string());

        let result = StreamConsumer::new(
            Arc::new(bus),
            Arc::new(MemoryStore::default()),
            &redis_config(),
            shutdown,
        )
        .await;

        assert!(result.is_err());
    }
}
