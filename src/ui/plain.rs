use crate::metrics::Horizon;
use crate::report::{format_age, format_bytes, format_rate, Report};

/// Lines above the table: title, totals, load, rule, column header, rule.
pub const HEADER_LINES: u16 = 6;
/// Status line below the table.
pub const FOOTER_LINES: u16 = 1;

const KEY_WIDTH: usize = 40;

/// Number of table rows that fit a terminal `lines` high, never less than one.
pub fn rows_for_height(lines: u16) -> usize {
    lines.saturating_sub(HEADER_LINES + FOOTER_LINES).max(1) as usize
}

/// Cuts `s` to at most `width` characters.
pub fn truncate(s: &str, width: usize) -> &str {
    match s.char_indices().nth(width) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn load_line(report: &Report) -> String {
    let g = &report.global;
    let msgs: Vec<String> = Horizon::ALL
        .iter()
        .map(|h| format!("{:.2}", g.message_rate(*h)))
        .collect();
    let bytes: Vec<String> = Horizon::ALL
        .iter()
        .map(|h| format_rate(g.byte_rate(*h)))
        .collect();
    format!("Load msg/s 1m/5m/15m: {} | Data 1m/5m/15m: {}", msgs.join(" / "), bytes.join(" / "))
}

pub fn totals_line(report: &Report) -> String {
    let g = &report.global;
    format!(
        "Elapsed: {:.1}s | Total Msg: {} ({:.2}/s) | Total Data: {} | Rate: {} | Keys: {}",
        report.uptime_secs,
        g.message_count,
        g.message_rate(Horizon::Short),
        format_bytes(g.byte_count),
        format_rate(g.byte_rate(Horizon::Short)),
        report.total_keys,
    )
}

/// Text rendering of a report. Every line is clipped to `columns` and there is
/// no trailing newline, so a full row budget never scrolls the terminal.
pub fn render(report: &Report, clock: &str, columns: u16, status: Option<&str>) -> String {
    let width = columns.max(1) as usize;
    let rule = "-".repeat(width);
    let mut lines = vec![
        format!("Zigbee2MQTT Network Monitor - {clock}"),
        totals_line(report),
        load_line(report),
        rule.clone(),
        format!(
            "{:<KEY_WIDTH$} | {:<10} | {:<12} | {:<9} | {:<22} | Last Seen",
            "Device/Topic", "Messages", "Data Volume", "Msg/s 1m", "Rate 1m"
        ),
        rule,
    ];

    lines.extend(report.rows.iter().map(|row| {
        format!(
            "{:<KEY_WIDTH$} | {:<10} | {:<12} | {:<9.2} | {:<22} | {}",
            truncate(row.key.as_str(), KEY_WIDTH),
            row.message_count,
            format_bytes(row.byte_count),
            row.message_rate(Horizon::Short),
            format_rate(row.byte_rate(Horizon::Short)),
            format_age(row.last_seen_secs),
        )
    }));
    if report.rows.is_empty() {
        lines.push("Waiting for messages...".to_string());
    }
    if let Some(status) = status {
        lines.push(status.to_string());
    }

    lines
        .iter()
        .map(|line| truncate(line, width))
        .collect::<Vec<_>>()
        .join("\n")
}
