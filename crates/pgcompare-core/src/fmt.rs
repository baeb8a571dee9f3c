//! Shared formatting helpers for the report renderer.
//!
//! All report numbers go through here so precision is fixed in one place:
//! percentages and ratios always carry two decimals, missing values always
//! render as [`UNKNOWN`].

use chrono::DateTime;

/// Marker for a value that could not be collected.
pub const UNKNOWN: &str = "unknown";

/// Marker for a value that was never measured, only assumed (tier descriptors).
pub const UNKNOWN_ASSUMED: &str = "unknown — assumed";

/// Format byte count as human-readable size.
///
/// `"1.50 GB"`, `"100.30 MB"`, `"50.00 kB"`, `"512 B"`
pub fn format_bytes(bytes: i64) -> String {
    let f = bytes as f64;
    let abs = bytes.unsigned_abs();
    if abs >= 1024 * 1024 * 1024 * 1024 {
        format!("{:.2} TB", f / (1024.0 * 1024.0 * 1024.0 * 1024.0))
    } else if abs >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", f / (1024.0 * 1024.0 * 1024.0))
    } else if abs >= 1024 * 1024 {
        format!("{:.2} MB", f / (1024.0 * 1024.0))
    } else if abs >= 1024 {
        format!("{:.2} kB", f / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in seconds as human-readable.
///
/// `"45s"`, `"3m 5s"`, `"2h 10m"`, `"3d 4h"`
pub fn format_duration(secs: f64) -> String {
    let secs = secs.max(0.0) as i64;
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// `"56.37%"`
pub fn format_pct(pct: f64) -> String {
    format!("{:.2}%", pct)
}

/// `"1.69x"`
pub fn format_ratio(ratio: f64) -> String {
    format!("{:.2}x", ratio)
}

/// Signed percentage-point delta: `"+4.59 pp"`, `"-4.59 pp"`.
pub fn format_delta_pp(delta: f64) -> String {
    format!("{:+.2} pp", delta)
}

/// `"10–15%"`
pub fn format_range_pct(low: f64, high: f64) -> String {
    format!("{:.0}–{:.0}%", low, high)
}

/// Monthly cost delta: `"+$610.28/mo"`, `"-$12.00/mo"`, `"$0.00/mo"`.
pub fn format_cost_delta(delta: f64, currency: &str) -> String {
    let symbol = currency_symbol(currency);
    if delta > 0.0 {
        format!("+{}{:.2}/mo", symbol, delta)
    } else if delta < 0.0 {
        format!("-{}{:.2}/mo", symbol, -delta)
    } else {
        format!("{}0.00/mo", symbol)
    }
}

fn currency_symbol(currency: &str) -> String {
    match currency {
        "USD" => "$".to_string(),
        "EUR" => "€".to_string(),
        other => format!("{} ", other),
    }
}

/// Thousands-separated integer: `"1,234,567"`.
pub fn format_count(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if n < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

/// Epoch seconds as `YYYY-MM-DD HH:MM:SS UTC`, or `"never"`.
pub fn format_epoch(ts: Option<i64>) -> String {
    match ts.and_then(|t| DateTime::from_timestamp(t, 0)) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "never".to_string(),
    }
}

/// Formats an optional value, substituting [`UNKNOWN`].
pub fn or_unknown<T>(value: Option<T>, f: impl FnOnce(T) -> String) -> String {
    value.map(f).unwrap_or_else(|| UNKNOWN.to_string())
}

/// Makes arbitrary text safe for a markdown table cell.
pub fn cell(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = flat.split_whitespace().collect::<Vec<_>>().join(" ");
    let escaped = collapsed.replace('|', "\\|");
    if escaped.is_empty() {
        UNKNOWN.to_string()
    } else {
        escaped
    }
}

/// Truncates to at most `max` characters, appending `…` when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut s: String = text.chars().take(max.saturating_sub(1)).collect();
        s.push('…');
        s
    }
}
