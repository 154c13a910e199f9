//! Quote read model and event payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasktrail_core::event::Event;

/// Event payload for the `quotes` stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

/// A row of the `quotes` read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: String,
    pub quote: String,
    pub version: u64,
    pub date_time_created: DateTime<Utc>,
    pub date_time_updated: DateTime<Utc>,
}

/// An event on the `quotes` stream.
pub type QuoteEvent = Event<QuoteData>;
