//! Serde helpers for durations.
//!
//! Accepts ISO-8601 periods (`PT10M`, `P1DT2H`, `PT0.5S`) and humantime
//! strings (`10m`, `1h 30m`, `250ms`). Serializes as humantime.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Parse either notation
pub fn parse(raw: &str) -> Result<Duration, String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('P') || trimmed.starts_with('p') {
        parse_iso8601(trimmed)
    } else {
        humantime::parse_duration(trimmed).map_err(|e| format!("invalid duration '{raw}': {e}"))
    }
}

/// Fixed-length ISO-8601 period. Years and months are rejected since their
/// length depends on the calendar.
fn parse_iso8601(raw: &str) -> Result<Duration, String> {
    let upper = raw.to_ascii_uppercase();
    let body = &upper[1..];
    let (date_part, time_part) = match body.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (body, None),
    };

    let mut seconds = 0f64;
    seconds += sum_units(date_part, raw, |unit| match unit {
        'W' => Some(7.0 * 86_400.0),
        'D' => Some(86_400.0),
        _ => None,
    })?;
    if let Some(time) = time_part {
        if time.is_empty() {
            return Err(format!("invalid duration '{raw}': empty time section"));
        }
        seconds += sum_units(time, raw, |unit| match unit {
            'H' => Some(3_600.0),
            'M' => Some(60.0),
            'S' => Some(1.0),
            _ => None,
        })?;
    }

    if body.is_empty() {
        return Err(format!("invalid duration '{raw}': no components"));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration '{raw}': {e}"))
}

fn sum_units(
    section: &str,
    raw: &str,
    scale: impl Fn(char) -> Option<f64>,
) -> Result<f64, String> {
    let mut total = 0.0;
    let mut number = String::new();
    for c in section.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let factor = scale(c).ok_or_else(|| format!("invalid duration '{raw}': unit '{c}'"))?;
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration '{raw}': missing number before '{c}'"))?;
        total += value * factor;
        number.clear();
    }
    if !number.is_empty() {
        return Err(format!("invalid duration '{raw}': trailing number without unit"));
    }
    Ok(total)
}

pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*value))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}
