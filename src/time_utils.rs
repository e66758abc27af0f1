// SPDX-License-Identifier: MIT

//! Shared helpers for date/time formatting.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current UTC calendar day.
pub fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Current UTC calendar day as "YYYY-MM-DD".
pub fn utc_today_string() -> String {
    utc_today().to_string()
}
