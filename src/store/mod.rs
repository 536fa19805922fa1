use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::config::{CurrencyEntry, CurrencyRegistry};
use crate::events::{CanonicalEvent, StoredEvent};

/// Default page size when the caller does not request one.
pub const DEFAULT_LIMIT: i64 = 10;
/// Hard ceiling on requested page size.
pub const MAX_LIMIT: i64 = 100;

/// Persistence seam for canonical bridge events. The consumer writes through
/// it and the read path queries through it; tests swap in doubles.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert one event. Only the raw persisted fields are written; derived
    /// currency fields never are.
    async fn save(&self, event: &CanonicalEvent) -> eyre::Result<()>;

    /// Keyset-paginated read ordered by timestamp descending. `last_id = 0`
    /// means no cursor; otherwise only rows with `id < last_id` are returned.
    /// `currency` rescales the amount via the registry, defaulting to WEI.
    async fn get_all(
        &self,
        last_id: i64,
        limit: i64,
        currency: &str,
    ) -> eyre::Result<Vec<StoredEvent>>;
}

/// PostgreSQL-backed store. Row ids come from a BIGSERIAL, so id order tracks
/// insertion order and serves as the pagination cursor.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
    currencies: CurrencyRegistry,
}

impl PgEventStore {
    pub fn new(pool: PgPool, currencies: CurrencyRegistry) -> Self {
        Self { pool, currencies }
    }

    /// Total persisted events, used by the health endpoint.
    pub async fn count(&self) -> eyre::Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bridge_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn save(&self, event: &CanonicalEvent) -> eyre::Result<()> {
        sqlx::query(
            "INSERT INTO bridge_events (token, amount, from_chain, to_chain, transaction_hash, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&event.token)
        .bind(&event.amount)
        .bind(&event.from_chain)
        .bind(&event.to_chain)
        .bind(&event.transaction_hash)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_all(
        &self,
        last_id: i64,
        limit: i64,
        currency: &str,
    ) -> eyre::Result<Vec<StoredEvent>> {
        let entry = self.currencies.resolve(currency);
        let mut query = build_get_all_query(&entry, last_id, clamp_limit(limit));

        let events = query
            .build_query_as::<StoredEvent>()
            .fetch_all(&self.pool)
            .await?;

        Ok(events)
    }
}

fn clamp_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_LIMIT
    } else {
        limit.min(MAX_LIMIT)
    }
}

/// Build the read query. The amount is rescaled in SQL as exact numeric text
/// (never floating point); factor and label arrive as bound parameters from
/// the registry, not from user input.
fn build_get_all_query(
    entry: &CurrencyEntry,
    last_id: i64,
    limit: i64,
) -> QueryBuilder<'static, Postgres> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id, token, trim_scale(amount::numeric / power(10::numeric, ",
    );
    builder.push_bind(entry.factor);
    builder.push("::numeric))::text AS amount, ");
    builder.push_bind(entry.label.clone());
    builder.push(
        "::text AS txn_currency, from_chain, to_chain, transaction_hash, timestamp \
         FROM bridge_events",
    );

    if last_id != 0 {
        builder.push(" WHERE id < ");
        builder.push_bind(last_id);
    }

    builder.push(" ORDER BY timestamp DESC LIMIT ");
    builder.push_bind(limit);

    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(-3), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(5), 5);
        assert_eq!(clamp_limit(100), 100);
        assert_eq!(clamp_limit(5000), MAX_LIMIT);
    }

    #[test]
    fn test_query_without_cursor_has_no_keyset_predicate() {
        let entry = CurrencyRegistry::default_entry();
        let query = build_get_all_query(&entry, 0, 5);
        let sql = query.sql();

        assert!(!sql.contains("WHERE id <"));
        assert!(sql.contains("ORDER BY timestamp DESC LIMIT"));
    }

    #[test]
    fn test_query_with_cursor_restricts_ids() {
        let entry = CurrencyRegistry::default_entry();
        let query = build_get_all_query(&entry, 42, 5);
        let sql = query.sql();

        assert!(sql.contains("WHERE id < "));
        assert!(sql.contains("ORDER BY timestamp DESC LIMIT"));
    }

    #[test]
    fn test_query_derives_amount_and_currency_columns() {
        let entry = CurrencyEntry {
            factor: 18,
            label: "ETH".to_string(),
        };
        let query = build_get_all_query(&entry, 0, 10);
        let sql = query.sql();

        // Exact numeric division rendered as text, plus a literal label column.
        assert!(sql.contains("amount::numeric / power(10::numeric,"));
        assert!(sql.contains("::text AS txn_currency"));
        assert!(!sql.contains("float"));
    }
}
