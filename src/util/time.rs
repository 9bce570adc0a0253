//! Time formatting helpers.

use chrono::{DateTime, Local, SecondsFormat, Utc};

use crate::error::{BeadsError, Result};

/// Format a UTC timestamp as RFC3339 with full nanosecond precision.
#[must_use]
pub fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse an RFC3339 timestamp into UTC.
///
/// # Errors
///
/// Returns a validation error naming `field_name` on malformed input.
pub fn parse_rfc3339(s: &str, field_name: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BeadsError::validation(field_name, format!("invalid RFC3339 timestamp: {e}")))
}

/// Local ISO-8601 timestamp used in auto-generated sync commit messages.
#[must_use]
pub fn local_iso_timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
