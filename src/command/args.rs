//! Argument conversion

use super::{ArgKind, ArgSpec, ArgValue, CommandError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static DURATION_UNITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(ms|h|m|s)").expect("valid duration regex"));

static USER_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<@!?(\d+)>$").expect("valid mention regex"));

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "enable" | "on" => Some(true),
        "false" | "no" | "disable" | "off" => Some(false),
        _ => None,
    }
}

/// Accepts `SS`, `MM:SS`, `HH:MM:SS`, or unit form like `1m30s` / `2.5s` / `500ms`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.chars().all(|c| c.is_ascii_digit() || c == ':') {
        let mut secs: u64 = 0;
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() > 3 {
            return None;
        }
        for part in parts {
            let n: u64 = part.parse().ok()?;
            secs = secs.checked_mul(60)?.checked_add(n)?;
        }
        return in_millis_range(Duration::from_secs(secs));
    }

    let mut total = 0f64;
    let mut consumed = 0;
    for caps in DURATION_UNITS.captures_iter(raw) {
        let value: f64 = caps[1].parse().ok()?;
        let factor = match caps[2].to_ascii_lowercase().as_str() {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            _ => 0.001,
        };
        total += value * factor;
        consumed += caps[0].chars().filter(|c| !c.is_whitespace()).count();
    }

    let significant = raw.chars().filter(|c| !c.is_whitespace()).count();
    if consumed == 0 || consumed != significant {
        return None;
    }
    Duration::try_from_secs_f64(total).ok().and_then(in_millis_range)
}

/// Positions travel to the backend as signed milliseconds.
fn in_millis_range(duration: Duration) -> Option<Duration> {
    i64::try_from(duration.as_millis()).ok().map(|_| duration)
}

/// `<@id>`, `<@!id>` or a bare id.
pub fn parse_user_id(raw: &str) -> Option<u64> {
    if let Some(caps) = USER_MENTION.captures(raw) {
        return caps[1].parse().ok();
    }
    raw.parse().ok()
}

pub fn convert(spec: &ArgSpec, raw: &str) -> Result<ArgValue, CommandError> {
    let invalid = || CommandError::InvalidArgument {
        name: spec.name.to_string(),
        kind: spec.kind.describe(),
    };

    match spec.kind {
        ArgKind::String => Ok(ArgValue::Str(raw.to_string())),
        ArgKind::Integer => raw.parse().map(ArgValue::Int).map_err(|_| invalid()),
        ArgKind::Boolean => parse_bool(raw).map(ArgValue::Bool).ok_or_else(invalid),
        ArgKind::Duration => parse_duration(raw).map(ArgValue::Duration).ok_or_else(invalid),
        ArgKind::User => parse_user_id(raw).map(ArgValue::UserId).ok_or_else(invalid),
    }
}
