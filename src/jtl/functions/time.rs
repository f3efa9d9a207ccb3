use super::{int_arg, present_arg, text_arg};
use crate::context::{EvalError, EventContext};
use crate::jdoc::JDoc;
use crate::jtl::calc;
use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use serde_json::Value as JsonValue;
use std::fmt::Write as _;

const DEFAULT_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub(super) fn time(_: &EventContext, _: &JDoc, _: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::from(Utc::now().timestamp_millis()))
}

/// `format(millis[, layout[, tz]])` with strftime layouts; `tz` is `UTC`,
/// `Local` or a fixed offset such as `+05:30`.
pub(super) fn format(
    _: &EventContext,
    _: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let millis = int_arg("format", args, 0)?;
    let instant = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| EvalError::runtime(format!("timestamp {millis} is out of range")))?;
    let layout = present_arg(args, 1)
        .map(crate::jdoc::to_text)
        .unwrap_or_else(|| DEFAULT_LAYOUT.to_string());
    let zone = present_arg(args, 2)
        .map(crate::jdoc::to_text)
        .unwrap_or_else(|| "UTC".to_string());

    let rendered = match zone.trim() {
        "UTC" | "utc" | "Z" => render(&instant, &layout)?,
        "Local" | "local" => render(&instant.with_timezone(&Local), &layout)?,
        offset => {
            let offset = parse_offset(offset)?;
            render(&offset.from_utc_datetime(&instant.naive_utc()), &layout)?
        }
    };
    Ok(JsonValue::String(rendered))
}

fn render<Tz: TimeZone>(instant: &DateTime<Tz>, layout: &str) -> Result<String, EvalError>
where
    Tz::Offset: std::fmt::Display,
{
    let mut rendered = String::new();
    write!(rendered, "{}", instant.format(layout))
        .map_err(|_| EvalError::syntax(format!("invalid time layout `{layout}`")))?;
    Ok(rendered)
}

fn parse_offset(raw: &str) -> Result<FixedOffset, EvalError> {
    let invalid = || EvalError::syntax(format!("unsupported timezone `{raw}`"));
    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((hours, minutes)) => (hours, minutes),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

pub(super) fn calc(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    calc::calculate(&text_arg(args, 0))
}
