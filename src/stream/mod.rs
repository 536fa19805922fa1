pub mod consumer;
pub mod producer;

use async_trait::async_trait;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

/// How long a group read blocks waiting for new entries. Bounds consumer
/// shutdown latency to one poll interval.
const READ_BLOCK_MS: usize = 2_000;

/// One entry read from the stream: broker-assigned id plus the raw field map
/// exactly as it was appended. The raw fields are kept so a malformed entry
/// can be forwarded to the dead-letter stream unchanged.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

/// Narrow append/read/ack surface over the durable stream. Producer and
/// consumer only see this trait, so tests can swap in scripted doubles.
#[async_trait]
pub trait StreamBus: Send + Sync {
    /// Append a field map with a broker-assigned entry id, returning the id.
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> eyre::Result<String>;

    /// Create the consumer group (and the stream if absent). A group that
    /// already exists is not an error.
    async fn ensure_group(&self, stream: &str, group: &str) -> eyre::Result<()>;

    /// Read up to `count` pending entries assigned to this consumer identity.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> eyre::Result<Vec<StreamEntry>>;

    /// Acknowledge a delivered entry so the group never redelivers it.
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> eyre::Result<()>;
}

/// Redis streams implementation over a multiplexed async connection.
#[derive(Clone)]
pub struct RedisStreamBus {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStreamBus {
    pub async fn connect(url: &str) -> eyre::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| eyre::eyre!("Invalid Redis URL '{}': {}", url, e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| eyre::eyre!("Failed to connect to Redis: {}", e))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl StreamBus for RedisStreamBus {
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> eyre::Result<String> {
        let mut conn = self.conn.clone();
        let id: String = conn.xadd(stream, "*", fields).await?;
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> eyre::Result<()> {
        let mut conn = self.conn.clone();
        // "0" starts delivery from the earliest entry.
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> eyre::Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(READ_BLOCK_MS);

        let reply: StreamReadReply = conn.xread_options(&[stream], &[">"], &options).await?;

        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let mut fields = Vec::with_capacity(id.map.len());
                for (name, value) in id.map {
                    let value: String = redis::from_redis_value(&value)
                        .map_err(|e| eyre::eyre!("Non-string stream field '{}': {}", name, e))?;
                    fields.push((name, value));
                }
                entries.push(StreamEntry { id: id.id, fields });
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> eyre::Result<()> {
        let mut conn = self.conn.clone();
        let _acked: i64 = conn.xack(stream, group, &[entry_id]).await?;
        Ok(())
    }
}
