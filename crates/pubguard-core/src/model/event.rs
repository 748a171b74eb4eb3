use serde::{Deserialize, Serialize};

use super::{CampaignId, PublisherId};

/// One raw tracking event, consumed once by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// Event type name, e.g. `install` or `purchase`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub campaign_id: CampaignId,
    pub publisher_id: PublisherId,
    /// Unix seconds.
    pub timestamp: i64,
}

impl Event {
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        campaign_id: CampaignId,
        publisher_id: PublisherId,
        timestamp: i64,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            campaign_id,
            publisher_id,
            timestamp,
        }
    }
}
