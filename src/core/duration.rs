//! Human-readable duration strings for config fields (`"30s"`, `"24h"`, `"7d"`).
//!
//! `parse` and `format` round-trip: `parse(&format(d)) == d` for any duration,
//! and `format(&parse(s))` re-parses to the same instant for accepted inputs.

#![allow(missing_docs)]

use std::time::Duration;

use crate::core::errors::{Result, SsgError};

const MS: u64 = 1;
const SECOND: u64 = 1_000;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Parse a duration like `"250ms"`, `"90s"`, `"15m"`, `"24h"`, or `"7d"`.
pub fn parse(input: &str) -> Result<Duration> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .filter(|&idx| idx > 0)
        .ok_or_else(|| invalid(input))?;
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().map_err(|_| invalid(input))?;

    let unit_ms = match unit {
        "ms" => MS,
        "s" => SECOND,
        "m" => MINUTE,
        "h" => HOUR,
        "d" => DAY,
        _ => return Err(invalid(input)),
    };

    let total = value.checked_mul(unit_ms).ok_or_else(|| invalid(input))?;
    Ok(Duration::from_millis(total))
}

/// Format a duration with the largest unit that divides it evenly.
pub fn format(d: Duration) -> String {
    let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 {
        return "0s".to_string();
    }
    for (unit_ms, suffix) in [(DAY, "d"), (HOUR, "h"), (MINUTE, "m"), (SECOND, "s")] {
        if ms % unit_ms == 0 {
            return format!("{}{suffix}", ms / unit_ms);
        }
    }
    format!("{ms}ms")
}

fn invalid(input: &str) -> SsgError {
    SsgError::InvalidConfig {
        details: format!(
            "invalid duration {input:?}: expected <digits><ms|s|m|h|d>, e.g. \"30m\""
        ),
    }
}
