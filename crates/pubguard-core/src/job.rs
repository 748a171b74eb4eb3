//! One optimization run: clear, aggregate, evaluate, reconcile, clear.
//!
//! The counter store is wiped before anything else happens. When
//! `clear_on_completion` is set it is wiped again on every exit path,
//! including failures of the initial clear, the sources or the store. If
//! both the run and that final clear fail, the run's error is returned and
//! the clear error is only logged.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span};

use crate::aggregate::{AggregateStats, Aggregator};
use crate::config::JobConfig;
use crate::error::JobError;
use crate::evaluate::{MeasuredScan, evaluate};
use crate::model::{Campaign, CampaignId, Event, PublisherId};
use crate::reconcile::{BlacklistSink, Notifier, reconcile};
use crate::source::{CampaignSource, EventSource};
use crate::store::CounterStore;

/// Result of one campaign's evaluation and reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignOutcome {
    pub campaign_id: CampaignId,
    pub blacklist_delta: Vec<PublisherId>,
    pub whitelist_delta: Vec<PublisherId>,
    pub newly_blacklisted: Vec<PublisherId>,
    /// A save was requested for this campaign.
    pub changed: bool,
    /// The requested save succeeded.
    pub persisted: bool,
    pub pages: u64,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub events_aggregated: u64,
    pub flushes: u64,
    pub increments: u64,
    pub campaigns: Vec<CampaignOutcome>,
}

impl JobReport {
    fn new(stats: AggregateStats) -> Self {
        Self {
            events_aggregated: stats.events,
            flushes: stats.flushes,
            increments: stats.increments,
            campaigns: Vec::new(),
        }
    }

    /// Outcome of one campaign, if it was evaluated.
    #[must_use]
    pub fn campaign(&self, campaign_id: CampaignId) -> Option<&CampaignOutcome> {
        self.campaigns
            .iter()
            .find(|outcome| outcome.campaign_id == campaign_id)
    }
}

/// A validated, ready-to-run optimization job.
#[derive(Debug, Clone)]
pub struct OptimizationJob {
    campaigns_path: PathBuf,
    events_path: PathBuf,
    start: i64,
    batch_size: NonZeroUsize,
    clear_on_completion: bool,
    measured_scan: MeasuredScan,
}

impl OptimizationJob {
    /// Build a job from configuration, resolving `start` against `now`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Config`] if the configuration does not validate.
    pub fn from_config(config: &JobConfig, now: DateTime<Utc>) -> Result<Self, JobError> {
        Ok(Self {
            campaigns_path: config.campaigns_path.clone(),
            events_path: config.events_path.clone(),
            start: config.start_timestamp(now)?,
            batch_size: config.batch_size()?,
            clear_on_completion: config.clear_on_completion,
            measured_scan: config.evaluation.measured_scan,
        })
    }

    /// Events before this unix timestamp are ignored.
    #[must_use]
    pub const fn start(&self) -> i64 {
        self.start
    }

    /// Run against the configured CSV sources.
    ///
    /// Both sources are opened before any event is aggregated.
    ///
    /// # Errors
    ///
    /// Returns the first source, record or store failure.
    pub fn run<S, N, B>(
        &self,
        store: &mut S,
        notifier: &N,
        blacklists: &mut B,
    ) -> Result<JobReport, JobError>
    where
        S: CounterStore + ?Sized,
        N: Notifier + ?Sized,
        B: BlacklistSink + ?Sized,
    {
        self.guarded(store, |store| {
            let campaigns = CampaignSource::open(&self.campaigns_path)?;
            let events = EventSource::open(&self.events_path, self.start)?;
            self.body(store, campaigns, events, notifier, blacklists)
        })
    }

    /// Run against already opened sources.
    ///
    /// Start filtering is the event source's job here.
    ///
    /// # Errors
    ///
    /// Returns the first source, record or store failure.
    pub fn run_with_sources<S, C, E, N, B>(
        &self,
        store: &mut S,
        campaigns: C,
        events: E,
        notifier: &N,
        blacklists: &mut B,
    ) -> Result<JobReport, JobError>
    where
        S: CounterStore + ?Sized,
        C: IntoIterator<Item = Result<Campaign, JobError>>,
        E: IntoIterator<Item = Result<Event, JobError>>,
        N: Notifier + ?Sized,
        B: BlacklistSink + ?Sized,
    {
        self.guarded(store, |store| {
            self.body(store, campaigns, events, notifier, blacklists)
        })
    }

    fn guarded<S, F>(&self, store: &mut S, body: F) -> Result<JobReport, JobError>
    where
        S: CounterStore + ?Sized,
        F: FnOnce(&mut S) -> Result<JobReport, JobError>,
    {
        let _span = info_span!(
            "optimization_run",
            batch_size = self.batch_size.get(),
            start = self.start,
            clear_on_completion = self.clear_on_completion,
        )
        .entered();

        let result = store
            .clear()
            .map_err(JobError::from)
            .and_then(|()| {
                info!("cleared counter store");
                body(store)
            });

        if !self.clear_on_completion {
            return result;
        }
        match (result, store.clear()) {
            (result, Ok(())) => {
                info!("cleared counter store on completion");
                result
            }
            (Ok(_), Err(err)) => {
                error!(error = %err, "completion clear failed");
                Err(err.into())
            }
            (Err(run_err), Err(err)) => {
                error!(error = %err, "completion clear failed after run error");
                Err(run_err)
            }
        }
    }

    fn body<S, C, E, N, B>(
        &self,
        store: &mut S,
        campaigns: C,
        events: E,
        notifier: &N,
        blacklists: &mut B,
    ) -> Result<JobReport, JobError>
    where
        S: CounterStore + ?Sized,
        C: IntoIterator<Item = Result<Campaign, JobError>>,
        E: IntoIterator<Item = Result<Event, JobError>>,
        N: Notifier + ?Sized,
        B: BlacklistSink + ?Sized,
    {
        let mut aggregator = Aggregator::new(self.batch_size);
        for event in events {
            aggregator.push(&event?, store)?;
        }
        let stats = aggregator.finish(store)?;
        info!(
            events = stats.events,
            flushes = stats.flushes,
            increments = stats.increments,
            "aggregated events"
        );

        let mut report = JobReport::new(stats);
        for campaign in campaigns {
            let campaign = campaign?;
            let verdict = evaluate(&campaign, &*store, self.measured_scan)?;
            let outcome = reconcile(&campaign, &verdict, notifier, blacklists);
            info!(
                campaign_id = campaign.id,
                blacklisted = verdict.blacklist.len(),
                whitelisted = verdict.whitelist.len(),
                newly_blacklisted = outcome.newly_blacklisted.len(),
                pages = verdict.pages,
                "evaluated campaign"
            );

            report.campaigns.push(CampaignOutcome {
                campaign_id: campaign.id,
                blacklist_delta: verdict.blacklist,
                whitelist_delta: verdict.whitelist,
                newly_blacklisted: outcome.newly_blacklisted,
                changed: outcome.changed,
                persisted: outcome.persisted,
                pages: verdict.pages,
            });
        }
        Ok(report)
    }
}
