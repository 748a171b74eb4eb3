use serde::{Deserialize, Serialize};

use super::{CampaignId, PublisherId, RatioThreshold};

/// Per-campaign rule for judging publisher quality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationProps {
    /// Volume event, e.g. `install`.
    pub source_event: String,
    /// Quality event, e.g. `purchase`.
    pub measured_event: String,
    /// Minimum source-event count before a publisher is judged at all.
    pub threshold: u64,
    /// Minimum acceptable `measured / source` ratio.
    pub ratio_threshold: RatioThreshold,
}

impl OptimizationProps {
    #[must_use]
    pub fn new(
        source_event: impl Into<String>,
        measured_event: impl Into<String>,
        threshold: u64,
        ratio_threshold: RatioThreshold,
    ) -> Self {
        Self {
            source_event: source_event.into(),
            measured_event: measured_event.into(),
            threshold,
            ratio_threshold,
        }
    }
}

/// A campaign and the blacklist it carries into the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub opt_props: OptimizationProps,
    blacklist: Vec<PublisherId>,
}

impl Campaign {
    /// Build a campaign; repeated blacklist ids keep their first position.
    #[must_use]
    pub fn new(
        id: CampaignId,
        opt_props: OptimizationProps,
        blacklist: impl IntoIterator<Item = PublisherId>,
    ) -> Self {
        let mut ordered = Vec::new();
        for publisher in blacklist {
            if !ordered.contains(&publisher) {
                ordered.push(publisher);
            }
        }
        Self {
            id,
            opt_props,
            blacklist: ordered,
        }
    }

    /// Blacklist entering this run, in source order.
    #[must_use]
    pub fn blacklist(&self) -> &[PublisherId] {
        &self.blacklist
    }

    #[must_use]
    pub fn is_blacklisted(&self, publisher: PublisherId) -> bool {
        self.blacklist.contains(&publisher)
    }
}
