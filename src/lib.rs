//! Relays on-chain bridging events into a durable, queryable record store.
//!
//! Data flow: chain log subscription -> decode -> Redis stream -> consumer
//! group -> PostgreSQL. The read path serves currency-normalized,
//! keyset-paginated queries over the persisted events.

pub mod api;
pub mod config;
pub mod events;
pub mod orchestrator;
pub mod store;
pub mod stream;
pub mod watcher;
