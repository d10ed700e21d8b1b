//! Turning raw stream payloads into display lines.

use serde_json::Value;
use time::{OffsetDateTime, UtcOffset, macros::format_description};

use super::LogKind;
use crate::serde_util::display_value;

const NOT_AVAILABLE: &str = "N/A";

/// Format a payload from the stream of `kind`, stamped with `now`.
pub fn format_line(kind: LogKind, raw: &str, now: OffsetDateTime) -> String {
    match kind {
        LogKind::Tx => format_tx(raw, now),
        LogKind::Node => format!("[{}] NODE {raw}", stamp(now)),
        LogKind::System => format!("[{}] SYS  {raw}", stamp(now)),
    }
}

/// Transaction events are JSON. Payloads that are not JSON, or are `null`, are kept as-is; any
/// other JSON value is formatted, with whatever fields it lacks shown as `N/A`.
pub fn format_tx(raw: &str, now: OffsetDateTime) -> String {
    let event = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) | Err(_) => return raw.to_string(),
        Ok(event) => event,
    };
    let hash = match event.get("tx_hash") {
        None | Some(Value::Null) => NOT_AVAILABLE.to_string(),
        Some(v) => display_value(v),
    };
    let block = event
        .get("block_info")
        .and_then(|b| b.get("number"))
        .filter(|n| !n.is_null())
        .map(display_value)
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let timestamps = event.get("timestamps").unwrap_or(&Value::Null);
    format!(
        "[{}] TX   hash={}  block={block}  timestamps={timestamps}",
        stamp(now),
        short_hash(&hash)
    )
}

/// `0xabcdef1234567890` becomes `0xabcd…7890`. Hashes of ten characters or fewer are unchanged.
pub fn short_hash(hash: &str) -> String {
    let chars: Vec<char> = hash.chars().collect();
    if chars.len() <= 10 {
        return hash.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

/// UTC with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
fn stamp(now: OffsetDateTime) -> String {
    now.to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
        ))
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
