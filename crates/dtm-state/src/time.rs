//! Time utilities for dtm-state.
//!
//! Backup names carry a fixed-width UTC timestamp with microsecond
//! resolution (`YYYYMMDDHHMMSSffffff`), so lexical and numeric order agree.

use chrono::{DateTime, Utc};

/// Number of digits in a backup timestamp.
pub const STAMP_LEN: usize = 20;

/// Current UTC time as an RFC 3339 string, for certificate metadata.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Current UTC time as a backup timestamp.
pub fn backup_stamp() -> u128 {
    stamp_from(Utc::now())
}

/// Render a backup timestamp as its fixed-width string form.
pub fn format_stamp(stamp: u128) -> String {
    format!("{stamp:0width$}", width = STAMP_LEN)
}

/// Parse a fixed-width backup timestamp.
pub fn parse_stamp(s: &str) -> Option<u128> {
    if s.len() != STAMP_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn stamp_from(dt: DateTime<Utc>) -> u128 {
    let text = dt.format("%Y%m%d%H%M%S%6f").to_string();
    // The format above always yields STAMP_LEN digits.
    text.parse().unwrap_or(0)
}
