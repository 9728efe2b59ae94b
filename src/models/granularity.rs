use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Bucket width for dashboard queries.
///
/// `Hour` is the native write granularity: stored rows are already truncated
/// to the hour, so hour queries never re-bucket. Coarser granularities are
/// computed at query time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Hour,
    Day,
    Week,
    Month,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Hour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// Whether stored rows are returned as-is, without re-bucketing.
    pub fn is_native(&self) -> bool {
        matches!(self, Granularity::Hour)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a granularity token is outside `{hour, day, week, month}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time unit '{0}', expected one of: hour, day, week, month")]
pub struct InvalidGranularity(pub String);

impl FromStr for Granularity {
    type Err = InvalidGranularity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            other => Err(InvalidGranularity(other.to_string())),
        }
    }
}
