//! Plain-text views of the store state.

use std::{collections::BTreeMap, fmt::Write as _};

use ccpanel::types::{AllParams, ChainKey, ChainParam, RunStatus, TsField, TxTimestamps};
use colored::{ColoredString, Colorize};

pub fn status_badge(status: RunStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        RunStatus::Idle => text.normal(),
        RunStatus::Running => text.yellow().bold(),
        RunStatus::Finished => text.green().bold(),
        RunStatus::Error => text.red().bold(),
    }
}

fn number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n:.3}")
    }
}

/// Both chains side by side.
pub fn params_table(params: &AllParams) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<22}{:>14}{:>14}",
        "parameter",
        ChainKey::Src.as_str(),
        ChainKey::Dst.as_str()
    );
    for param in ChainParam::ALL {
        let _ = writeln!(
            out,
            "{:<22}{:>14}{:>14}",
            param.as_str(),
            number(params.src_chain.get(param)),
            number(params.dst_chain.get(param))
        );
    }
    out
}

/// One row per stage timestamp, with the time since the previous recorded stage.
pub fn timestamps_table(tx_hash: &str, ts: &TxTimestamps) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "transaction {tx_hash}");
    if ts.is_empty() {
        let _ = writeln!(out, "  no stage timestamps recorded");
        return out;
    }
    let deltas: BTreeMap<TsField, f64> = ts.stages().into_iter().map(|s| (s.to, s.delta)).collect();
    for field in TsField::ALL {
        let Some(value) = ts.get(field) else {
            let _ = writeln!(out, "  {:<7}{:>16}", field.as_str(), "-");
            continue;
        };
        let delta = deltas
            .get(&field)
            .map(|d| format!("+{}", number(*d)))
            .unwrap_or_default();
        let _ = writeln!(out, "  {:<7}{:>16}{:>12}", field.as_str(), number(value), delta);
    }
    if let Some(total) = ts.total() {
        let _ = writeln!(out, "  {:<7}{:>16}", "total", number(total));
    }
    out
}
