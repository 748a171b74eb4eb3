//! Turning a campaign verdict into notifications and a persisted blacklist.
//!
//! Order of effects for one campaign:
//!
//! 1. `sendMailWhitelisted` with the whole whitelist delta, if non-empty;
//! 2. `sendMailBlacklisted` with the publishers not on the prior blacklist,
//!    if any;
//! 3. if either fired, the blacklist delta is saved as the new blacklist
//!    (replacing, never merging with, the prior one) and `saveBlacklist`
//!    is emitted.
//!
//! Sinks see each notification as an event name plus a
//! `{"campaign", "publishers"}` context. Sinks match on those names.
//!
//! Notifications and persistence are injected capabilities. Neither can
//! fail the run: notifiers have no error channel and a failed save is
//! logged.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::evaluate::Verdict;
use crate::model::{Campaign, CampaignId, PublisherId};

/// One outbound notification.
///
/// Serializes as `{"event": <name>, "campaign": .., "publishers": [..]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum Notification {
    #[serde(rename = "sendMailWhitelisted")]
    Whitelisted {
        #[serde(rename = "campaign")]
        campaign_id: CampaignId,
        publishers: Vec<PublisherId>,
    },
    #[serde(rename = "sendMailBlacklisted")]
    Blacklisted {
        #[serde(rename = "campaign")]
        campaign_id: CampaignId,
        publishers: Vec<PublisherId>,
    },
    #[serde(rename = "saveBlacklist")]
    BlacklistSaved {
        #[serde(rename = "campaign")]
        campaign_id: CampaignId,
        publishers: Vec<PublisherId>,
    },
}

impl Notification {
    /// Event name handed to notification sinks.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Whitelisted { .. } => "sendMailWhitelisted",
            Self::Blacklisted { .. } => "sendMailBlacklisted",
            Self::BlacklistSaved { .. } => "saveBlacklist",
        }
    }

    #[must_use]
    pub const fn campaign_id(&self) -> CampaignId {
        match self {
            Self::Whitelisted { campaign_id, .. }
            | Self::Blacklisted { campaign_id, .. }
            | Self::BlacklistSaved { campaign_id, .. } => *campaign_id,
        }
    }

    #[must_use]
    pub fn publishers(&self) -> &[PublisherId] {
        match self {
            Self::Whitelisted { publishers, .. }
            | Self::Blacklisted { publishers, .. }
            | Self::BlacklistSaved { publishers, .. } => publishers,
        }
    }

    /// Context mapping handed to notification sinks alongside [`Self::name`].
    #[must_use]
    pub fn context(&self) -> Value {
        json!({
            "campaign": self.campaign_id(),
            "publishers": self.publishers(),
        })
    }
}

/// Fire-and-forget notification capability.
pub trait Notifier {
    fn notify(&self, notification: &Notification);
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _: &Notification) {}
}

/// Emits notifications as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        info!(
            event = notification.name(),
            campaign_id = notification.campaign_id(),
            publishers = ?notification.publishers(),
            "notification"
        );
    }
}

/// Keeps every notification in arrival order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
    }
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn notify(&self, notification: &Notification) {
        (**self).notify(notification);
    }
}

/// Best-effort persistence of a campaign's authoritative blacklist.
pub trait BlacklistSink {
    /// Replace the stored blacklist of `campaign_id` with `publishers`.
    ///
    /// # Errors
    ///
    /// Implementations report storage failures; callers log them and carry on.
    fn save_blacklist(
        &mut self,
        campaign_id: CampaignId,
        publishers: &[PublisherId],
    ) -> anyhow::Result<()>;
}

/// Accepts every save and stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBlacklistSink;

impl BlacklistSink for NoopBlacklistSink {
    fn save_blacklist(&mut self, _: CampaignId, _: &[PublisherId]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps every saved blacklist in call order.
#[derive(Debug, Default, Clone)]
pub struct RecordingBlacklistSink {
    saved: Vec<(CampaignId, Vec<PublisherId>)>,
}

impl RecordingBlacklistSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn saved(&self) -> &[(CampaignId, Vec<PublisherId>)] {
        &self.saved
    }

    /// Most recently saved blacklist of one campaign.
    #[must_use]
    pub fn latest(&self, campaign_id: CampaignId) -> Option<&[PublisherId]> {
        self.saved
            .iter()
            .rev()
            .find(|(id, _)| *id == campaign_id)
            .map(|(_, publishers)| publishers.as_slice())
    }
}

impl BlacklistSink for RecordingBlacklistSink {
    fn save_blacklist(
        &mut self,
        campaign_id: CampaignId,
        publishers: &[PublisherId],
    ) -> anyhow::Result<()> {
        self.saved.push((campaign_id, publishers.to_vec()));
        Ok(())
    }
}

impl<B: BlacklistSink + ?Sized> BlacklistSink for &mut B {
    fn save_blacklist(
        &mut self,
        campaign_id: CampaignId,
        publishers: &[PublisherId],
    ) -> anyhow::Result<()> {
        (**self).save_blacklist(campaign_id, publishers)
    }
}

/// What reconciling one campaign did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Blacklist delta entries absent from the prior blacklist.
    pub newly_blacklisted: Vec<PublisherId>,
    /// Whether a save was requested.
    pub changed: bool,
    /// Whether the requested save succeeded.
    pub persisted: bool,
}

/// Apply one campaign's verdict.
pub fn reconcile<N, B>(
    campaign: &Campaign,
    verdict: &Verdict,
    notifier: &N,
    blacklists: &mut B,
) -> ReconcileOutcome
where
    N: Notifier + ?Sized,
    B: BlacklistSink + ?Sized,
{
    let mut outcome = ReconcileOutcome::default();

    if !verdict.whitelist.is_empty() {
        notifier.notify(&Notification::Whitelisted {
            campaign_id: campaign.id,
            publishers: verdict.whitelist.clone(),
        });
        outcome.changed = true;
    }

    outcome.newly_blacklisted = newly_blacklisted(campaign.blacklist(), &verdict.blacklist);
    if !outcome.newly_blacklisted.is_empty() {
        notifier.notify(&Notification::Blacklisted {
            campaign_id: campaign.id,
            publishers: outcome.newly_blacklisted.clone(),
        });
        outcome.changed = true;
    }

    if !outcome.changed {
        return outcome;
    }

    match blacklists.save_blacklist(campaign.id, &verdict.blacklist) {
        Ok(()) => outcome.persisted = true,
        Err(err) => warn!(campaign_id = campaign.id, error = %err, "failed to save blacklist"),
    }
    notifier.notify(&Notification::BlacklistSaved {
        campaign_id: campaign.id,
        publishers: verdict.blacklist.clone(),
    });
    outcome
}

/// `delta \ prior`, keeping first-seen order of `delta`.
fn newly_blacklisted(prior: &[PublisherId], delta: &[PublisherId]) -> Vec<PublisherId> {
    let mut out: Vec<PublisherId> = Vec::new();
    for &publisher in delta {
        if !prior.contains(&publisher) && !out.contains(&publisher) {
            out.push(publisher);
        }
    }
    out
}
