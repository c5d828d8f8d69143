/// Lookback window parsing.
///
/// Parses timeframe strings (e.g. '3', '3m', '1y') into a number of months and
/// turns them into a cutoff timestamp relative to an injected "now".
use anyhow::{anyhow, Result};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

/// Longest supported lookback (ten years).
pub const MAX_LOOKBACK_MONTHS: u32 = 120;

/// Lookback used when a request does not name one.
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 3;

/// A positive number of calendar months to look back from "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lookback(u32);

impl Default for Lookback {
    fn default() -> Self {
        Lookback(DEFAULT_LOOKBACK_MONTHS)
    }
}

impl Lookback {
    /// Build a lookback from a month count (1..=120).
    pub fn months(months: u32) -> Result<Self> {
        if (1..=MAX_LOOKBACK_MONTHS).contains(&months) {
            Ok(Lookback(months))
        } else {
            Err(anyhow!(
                "Lookback must be between 1 and {} months, got {}",
                MAX_LOOKBACK_MONTHS,
                months
            ))
        }
    }

    /// Parse a timeframe string.
    ///
    /// Supported formats:
    /// - "3" → 3 months
    /// - "6m" → 6 months
    /// - "1y" → 12 months
    pub fn parse(timeframe: &str) -> Result<Self> {
        let timeframe = timeframe.trim().to_ascii_lowercase();

        if let Ok(months) = timeframe.parse::<u32>() {
            return Self::months(months);
        }

        if let Some(months) = timeframe.strip_suffix('m') {
            if let Ok(months) = months.parse::<u32>() {
                return Self::months(months);
            }
        }

        if let Some(years) = timeframe.strip_suffix('y') {
            if let Ok(years) = years.parse::<u32>() {
                return Self::months(years.saturating_mul(12));
            }
        }

        Err(anyhow!(
            "Invalid timeframe: '{}'. Expected: '3', '3m' or '1y'",
            timeframe
        ))
    }

    /// Parse an optional query value, falling back to the default lookback.
    pub fn parse_or_default(timeframe: Option<&str>) -> Result<Self> {
        match timeframe {
            Some(t) if !t.trim().is_empty() => Self::parse(t),
            _ => Ok(Self::default()),
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Earliest publication time included in the window ending at `now`.
    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(self.0))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Check whether a timestamp falls inside the window ending at `now`.
    pub fn contains(self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        ts >= self.cutoff(now)
    }
}

impl std::fmt::Display for Lookback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}m", self.0)
    }
}
