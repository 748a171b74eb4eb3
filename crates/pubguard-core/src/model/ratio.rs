//! Fixed-precision conversion ratios.
//!
//! Ratios are never computed in binary floating point. Both the configured
//! threshold and the observed `measured / source` ratio are truncated toward
//! zero to [`RATIO_PRECISION`] fractional digits before they are compared, so
//! the blacklist decision for a given pair of counters is identical on every
//! platform.

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Fractional digits kept for ratios and thresholds.
pub const RATIO_PRECISION: u32 = 3;

/// Why a ratio threshold string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RatioParseError {
    #[error("ratio threshold is empty")]
    Empty,
    #[error("ratio threshold '{0}' is not a decimal number")]
    NotDecimal(String),
    #[error("ratio threshold '{0}' is negative")]
    Negative(String),
}

/// Minimum acceptable `measured / source` ratio for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatioThreshold {
    raw: Decimal,
}

impl RatioThreshold {
    /// Build a threshold from an already-parsed decimal.
    ///
    /// # Errors
    ///
    /// Returns [`RatioParseError::Negative`] for values below zero.
    pub fn new(raw: Decimal) -> Result<Self, RatioParseError> {
        if raw.is_sign_negative() && !raw.is_zero() {
            return Err(RatioParseError::Negative(raw.to_string()));
        }
        Ok(Self { raw })
    }

    /// Threshold exactly as configured, before truncation.
    #[must_use]
    pub const fn raw(&self) -> Decimal {
        self.raw
    }

    /// Threshold truncated to the comparison precision.
    #[must_use]
    pub fn effective(&self) -> Decimal {
        truncate(self.raw)
    }

    /// True when an observed ratio falls strictly below this threshold.
    ///
    /// A ratio equal to the threshold at [`RATIO_PRECISION`] digits is not
    /// below it.
    #[must_use]
    pub fn is_above(&self, ratio: Decimal) -> bool {
        self.effective() > truncate(ratio)
    }
}

impl FromStr for RatioThreshold {
    type Err = RatioParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RatioParseError::Empty);
        }
        let raw = Decimal::from_str(trimmed)
            .map_err(|_| RatioParseError::NotDecimal(trimmed.to_string()))?;
        Self::new(raw)
    }
}

impl fmt::Display for RatioThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw.normalize())
    }
}

impl Serialize for RatioThreshold {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RatioThreshold {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// `measured / source`, truncated to [`RATIO_PRECISION`] digits.
///
/// Returns `None` when `source` is zero.
#[must_use]
pub fn conversion_ratio(measured: u64, source: u64) -> Option<Decimal> {
    Decimal::from(measured)
        .checked_div(Decimal::from(source))
        .map(truncate)
}

fn truncate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATIO_PRECISION, RoundingStrategy::ToZero)
}
