use serde::{Deserialize, Serialize};

use crate::events::StoredEvent;

#[derive(Debug, Deserialize)]
pub struct EventParams {
    pub last_id: Option<i64>,
    pub limit: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<StoredEvent>,
    /// Cursor for the next page: id of the last event returned, or the
    /// requested cursor when the page is empty.
    pub last_id: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub total_events: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
