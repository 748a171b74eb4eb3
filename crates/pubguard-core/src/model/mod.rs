//! Domain records shared by the aggregator, evaluator and reconciler.

pub mod campaign;
pub mod event;
pub mod ratio;

pub use campaign::{Campaign, OptimizationProps};
pub use event::Event;
pub use ratio::{RATIO_PRECISION, RatioParseError, RatioThreshold, conversion_ratio};

/// Campaign identifier as it appears in the tabular sources and store keys.
pub type CampaignId = i64;

/// Publisher identifier as it appears in the tabular sources and store keys.
pub type PublisherId = i64;
