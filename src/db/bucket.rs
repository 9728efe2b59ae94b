//! Bucket expressions for re-bucketing hourly rows at query time.
//!
//! Each (granularity, backend) pair maps to one SQL expression over the
//! stored `created_at` column. Day and week are fixed-width buckets floored
//! with a positive remainder, since SQL `/` and `%` truncate toward zero; month
//! is calendar-aware and uses each backend's own date functions, since months
//! vary in length.
//!
//! All expressions shift by the configured timezone offset (seconds east of
//! UTC) before truncating and shift back afterwards, so bucket boundaries land
//! on local midnight while the returned value stays a UTC timestamp.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate};

use crate::models::Granularity;

pub const DAY_SECS: i64 = 86_400;
pub const WEEK_SECS: i64 = 7 * DAY_SECS;

/// The Unix epoch fell on a Thursday; shifting by three days puts week
/// boundaries on Monday.
pub const MONDAY_ALIGN_SECS: i64 = 3 * DAY_SECS;

/// SQL dialect of the configured database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
    Mysql,
}

impl fmt::Display for DatabaseBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseBackend::Sqlite => write!(f, "sqlite"),
            DatabaseBackend::Postgres => write!(f, "postgres"),
            DatabaseBackend::Mysql => write!(f, "mysql"),
        }
    }
}

/// Shape of a bucket, independent of SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketKind {
    /// Stored hourly buckets are used as-is.
    Native,
    /// `t - ((t + align) mod width)`, with a non-negative remainder.
    FixedWidth { width: i64, align: i64 },
    /// Start of the calendar month.
    CalendarMonth,
}

/// Bucket descriptor consumed by the repositories' query builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketExpr {
    kind: BucketKind,
    tz_offset: i64,
}

impl BucketExpr {
    pub fn for_query(granularity: Granularity, tz_offset: i64) -> Self {
        let kind = match granularity {
            Granularity::Hour => BucketKind::Native,
            Granularity::Day => BucketKind::FixedWidth {
                width: DAY_SECS,
                align: 0,
            },
            Granularity::Week => BucketKind::FixedWidth {
                width: WEEK_SECS,
                align: MONDAY_ALIGN_SECS,
            },
            Granularity::Month => BucketKind::CalendarMonth,
        };
        Self { kind, tz_offset }
    }

    pub fn kind(&self) -> BucketKind {
        self.kind
    }

    pub fn tz_offset(&self) -> i64 {
        self.tz_offset
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, BucketKind::Native)
    }

    /// Compute the bucket start for a timestamp in Rust.
    ///
    /// Mirrors [`BucketExpr::to_sql`] so callers and tests can bucket values
    /// without a round trip to the database.
    pub fn bucket_start(&self, ts: i64) -> i64 {
        match self.kind {
            BucketKind::Native => ts,
            BucketKind::FixedWidth { width, align } => {
                ts - (ts + self.tz_offset + align).rem_euclid(width)
            }
            BucketKind::CalendarMonth => {
                let local = ts + self.tz_offset;
                let Some(dt) = DateTime::from_timestamp(local, 0) else {
                    return ts;
                };
                NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| d.and_utc().timestamp() - self.tz_offset)
                    .unwrap_or(ts)
            }
        }
    }

    /// Render the bucket expression over `column` for the given backend.
    pub fn to_sql(&self, backend: DatabaseBackend, column: &str) -> String {
        match self.kind {
            BucketKind::Native => column.to_string(),
            // `%` follows the dividend's sign on every backend; adding `width`
            // before the second `%` keeps the remainder in [0, width).
            BucketKind::FixedWidth { width, align } => format!(
                "{column} - (((({column}{plus}) % {width}) + {width}) % {width})",
                plus = signed(self.tz_offset + align),
            ),
            BucketKind::CalendarMonth => {
                let plus = signed(self.tz_offset);
                let minus = signed(-self.tz_offset);
                match backend {
                    DatabaseBackend::Sqlite => format!(
                        "CAST(STRFTIME('%s', DATE({column}{plus}, 'unixepoch', 'start of month')) AS INTEGER){minus}"
                    ),
                    DatabaseBackend::Postgres => format!(
                        "CAST(EXTRACT(EPOCH FROM DATE_TRUNC('month', TO_TIMESTAMP({column}{plus}) AT TIME ZONE 'UTC')) AS BIGINT){minus}"
                    ),
                    // Relies on the session time zone being UTC (set on connect).
                    DatabaseBackend::Mysql => format!(
                        "CAST(UNIX_TIMESTAMP(DATE_FORMAT(FROM_UNIXTIME({column}{plus}), '%Y-%m-01')) AS SIGNED){minus}"
                    ),
                }
            }
        }
    }
}

/// Format an integer term as ` + n` / ` - n`, or nothing for zero.
fn signed(n: i64) -> String {
    match n {
        0 => String::new(),
        n if n > 0 => format!(" + {n}"),
        n => format!(" - {}", n.unsigned_abs()),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    // 2024-01-01T00:00:00Z, a Monday.
    const MON_2024_01_01: i64 = 1_704_067_200;
    const UTC_PLUS_8: i64 = 8 * 3600;
    const UTC_MINUS_5: i64 = -5 * 3600;

    #[test]
    fn test_hour_is_native() {
        let expr = BucketExpr::for_query(Granularity::Hour, UTC_PLUS_8);
        assert!(expr.is_native());
        assert_eq!(expr.bucket_start(3600), 3600);
        assert_eq!(expr.to_sql(DatabaseBackend::Postgres, "created_at"), "created_at");
    }

    #[test]
    fn test_day_buckets_align_to_local_midnight() {
        let expr = BucketExpr::for_query(Granularity::Day, UTC_PLUS_8);
        let local_midnight = MON_2024_01_01 - UTC_PLUS_8;
        assert_eq!(expr.bucket_start(local_midnight), local_midnight);
        assert_eq!(expr.bucket_start(local_midnight + 1000), local_midnight);
        assert_eq!(expr.bucket_start(local_midnight + DAY_SECS - 1), local_midnight);
        assert_eq!(
            expr.bucket_start(local_midnight + DAY_SECS),
            local_midnight + DAY_SECS
        );
    }

    #[test]
    fn test_day_buckets_utc() {
        let expr = BucketExpr::for_query(Granularity::Day, 0);
        assert_eq!(expr.bucket_start(MON_2024_01_01 + 12 * 3600), MON_2024_01_01);
    }

    #[test]
    fn test_week_starts_on_monday() {
        let expr = BucketExpr::for_query(Granularity::Week, 0);
        let wednesday = MON_2024_01_01 + 2 * DAY_SECS + 12 * 3600;
        let sunday_last_second = MON_2024_01_01 + 7 * DAY_SECS - 1;
        assert_eq!(expr.bucket_start(MON_2024_01_01), MON_2024_01_01);
        assert_eq!(expr.bucket_start(wednesday), MON_2024_01_01);
        assert_eq!(expr.bucket_start(sunday_last_second), MON_2024_01_01);
        assert_eq!(
            expr.bucket_start(MON_2024_01_01 + WEEK_SECS),
            MON_2024_01_01 + WEEK_SECS
        );
    }

    #[test]
    fn test_week_starts_on_monday_near_epoch() {
        let expr = BucketExpr::for_query(Granularity::Week, 0);
        // 1970-01-05 was the first Monday after the epoch.
        let monday = 4 * DAY_SECS;
        assert_eq!(expr.bucket_start(monday), monday);
        assert_eq!(expr.bucket_start(monday + 2 * DAY_SECS), monday);
    }

    #[test]
    fn test_week_respects_timezone() {
        let expr = BucketExpr::for_query(Granularity::Week, UTC_PLUS_8);
        let local_monday = MON_2024_01_01 - UTC_PLUS_8;
        // Sunday 20:00 UTC is already Monday 04:00 in UTC+8.
        assert_eq!(expr.bucket_start(MON_2024_01_01 - 4 * 3600), local_monday);
        assert_eq!(expr.bucket_start(local_monday - 1), local_monday - WEEK_SECS);
    }

    #[test]
    fn test_month_start_utc() {
        let expr = BucketExpr::for_query(Granularity::Month, 0);
        // 2024-02-15T00:00:00Z -> 2024-02-01T00:00:00Z
        assert_eq!(expr.bucket_start(1_707_955_200), 1_706_745_600);
        // 2024-02-29T23:59:59Z stays in February (leap year).
        assert_eq!(expr.bucket_start(1_709_251_199), 1_706_745_600);
        // 2024-03-01T00:00:00Z starts March.
        assert_eq!(expr.bucket_start(1_709_251_200), 1_709_251_200);
    }

    #[test]
    fn test_month_start_with_positive_offset() {
        let expr = BucketExpr::for_query(Granularity::Month, UTC_PLUS_8);
        assert_eq!(expr.bucket_start(1_707_955_200), 1_706_745_600 - UTC_PLUS_8);
        // 2024-01-31T20:00:00Z is already February 1st in UTC+8.
        assert_eq!(expr.bucket_start(1_706_731_200), 1_706_745_600 - UTC_PLUS_8);
    }

    #[test]
    fn test_month_start_with_negative_offset() {
        let expr = BucketExpr::for_query(Granularity::Month, UTC_MINUS_5);
        // 2024-03-01T02:00:00Z is still February 29th in UTC-5.
        assert_eq!(expr.bucket_start(1_709_258_400), 1_706_745_600 - UTC_MINUS_5);
    }

    #[test]
    fn test_day_floors_before_local_epoch() {
        let expr = BucketExpr::for_query(Granularity::Day, UTC_MINUS_5);
        // 1970-01-01T00:00Z is 1969-12-31T19:00 in UTC-5.
        let local_midnight = -DAY_SECS - UTC_MINUS_5;
        assert_eq!(local_midnight, -68_400);
        assert_eq!(expr.bucket_start(0), local_midnight);
        assert_eq!(expr.bucket_start(100), local_midnight);
        assert_eq!(expr.bucket_start(-7200), local_midnight);
        assert_eq!(expr.bucket_start(-UTC_MINUS_5), -UTC_MINUS_5);
    }

    #[test]
    fn test_week_floors_before_epoch() {
        let expr = BucketExpr::for_query(Granularity::Week, 0);
        // 1969-12-29 was the Monday of the epoch's week.
        let monday = -3 * DAY_SECS;
        assert_eq!(expr.bucket_start(0), monday);
        assert_eq!(expr.bucket_start(monday - 1), monday - WEEK_SECS);
    }

    #[rstest]
    #[case(DatabaseBackend::Sqlite)]
    #[case(DatabaseBackend::Postgres)]
    #[case(DatabaseBackend::Mysql)]
    fn test_day_sql(#[case] backend: DatabaseBackend) {
        let expr = BucketExpr::for_query(Granularity::Day, UTC_PLUS_8);
        assert_eq!(
            expr.to_sql(backend, "created_at"),
            "created_at - ((((created_at + 28800) % 86400) + 86400) % 86400)"
        );
    }

    #[test]
    fn test_week_sql_negative_offset_folds_into_alignment() {
        let expr = BucketExpr::for_query(Granularity::Week, UTC_MINUS_5);
        assert_eq!(
            expr.to_sql(DatabaseBackend::Postgres, "created_at"),
            "created_at - ((((created_at + 241200) % 604800) + 604800) % 604800)"
        );
    }

    #[test]
    fn test_day_sql_with_negative_shift() {
        let expr = BucketExpr::for_query(Granularity::Day, UTC_MINUS_5);
        assert_eq!(
            expr.to_sql(DatabaseBackend::Sqlite, "created_at"),
            "created_at - ((((created_at - 18000) % 86400) + 86400) % 86400)"
        );
    }

    #[test]
    fn test_day_sql_without_offset() {
        let expr = BucketExpr::for_query(Granularity::Day, 0);
        assert_eq!(
            expr.to_sql(DatabaseBackend::Sqlite, "created_at"),
            "created_at - ((((created_at) % 86400) + 86400) % 86400)"
        );
    }

    #[test]
    fn test_month_sql_per_backend() {
        let expr = BucketExpr::for_query(Granularity::Month, UTC_MINUS_5);
        assert_eq!(
            expr.to_sql(DatabaseBackend::Sqlite, "created_at"),
            "CAST(STRFTIME('%s', DATE(created_at - 18000, 'unixepoch', 'start of month')) AS INTEGER) + 18000"
        );
        assert!(
            expr.to_sql(DatabaseBackend::Postgres, "created_at")
                .starts_with("CAST(EXTRACT(EPOCH FROM DATE_TRUNC('month', TO_TIMESTAMP(created_at - 18000)")
        );
        assert!(
            expr.to_sql(DatabaseBackend::Mysql, "created_at")
                .contains("FROM_UNIXTIME(created_at - 18000), '%Y-%m-01'")
        );
    }
}
