use chrono::{DateTime, Utc};
use serde::Serialize;

/// Field names used on the durable stream. The producer writes these and the
/// consumer reads them back; the dead-letter stream reuses the same schema.
pub const FIELD_TOKEN: &str = "token";
pub const FIELD_AMOUNT: &str = "amount";
pub const FIELD_FROM_CHAIN: &str = "fromChain";
pub const FIELD_TO_CHAIN: &str = "toChain";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_TX_HASH: &str = "transactionHash";

/// A bridging event in its canonical wire form: decoded from a chain log,
/// carried over the stream as a flat field map, persisted by the consumer.
/// Has no identity until the store assigns one.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    pub token: String,
    /// Integer amount in the token's smallest unit, as decimal text.
    pub amount: String,
    pub from_chain: String,
    pub to_chain: String,
    pub transaction_hash: String,
    pub timestamp: DateTime<Utc>,
}

impl CanonicalEvent {
    /// Flatten into the stream entry field map. Timestamps travel as RFC 3339.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            (FIELD_TOKEN.to_string(), self.token.clone()),
            (FIELD_AMOUNT.to_string(), self.amount.clone()),
            (FIELD_FROM_CHAIN.to_string(), self.from_chain.clone()),
            (FIELD_TO_CHAIN.to_string(), self.to_chain.clone()),
            (FIELD_TIMESTAMP.to_string(), self.timestamp.to_rfc3339()),
            (FIELD_TX_HASH.to_string(), self.transaction_hash.clone()),
        ]
    }

    /// Rebuild from a stream entry field map. Fails on a missing field or an
    /// unparseable timestamp; the consumer treats that as a decode error.
    pub fn from_fields(fields: &[(String, String)]) -> eyre::Result<Self> {
        let timestamp = DateTime::parse_from_rfc3339(field(fields, FIELD_TIMESTAMP)?)
            .map_err(|e| eyre::eyre!("Invalid timestamp field: {}", e))?
            .with_timezone(&Utc);

        Ok(Self {
            token: field(fields, FIELD_TOKEN)?.to_string(),
            amount: field(fields, FIELD_AMOUNT)?.to_string(),
            from_chain: field(fields, FIELD_FROM_CHAIN)?.to_string(),
            to_chain: field(fields, FIELD_TO_CHAIN)?.to_string(),
            transaction_hash: field(fields, FIELD_TX_HASH)?.to_string(),
            timestamp,
        })
    }
}

fn field<'a>(fields: &'a [(String, String)], key: &str) -> eyre::Result<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| eyre::eyre!("Missing stream field '{}'", key))
}

/// A persisted bridging event as returned by the read path. `amount` is
/// rescaled and `txn_currency` attached at query time; neither is stored.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub id: i64,
    pub token: String,
    pub amount: String,
    pub txn_currency: String,
    pub from_chain: String,
    pub to_chain: String,
    pub transaction_hash: String,
    pub timestamp: DateTime<Utc>,
}
