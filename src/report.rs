use std::cmp::Ordering;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::key::AggregationKey;
use crate::metrics::Horizon;
use crate::state::{TableSnapshot, TrafficRecord};

// positions inside ReportRow::rates
const MSG_SHORT: usize = 0;
const BYTE_SHORT: usize = 3;

/// One rendered line of the top-talkers table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportRow {
    pub key: AggregationKey,
    pub message_count: u64,
    pub byte_count: u64,
    /// Message rates (1m, 5m, 15m) followed by byte rates (1m, 5m, 15m), per second.
    pub rates: [f64; 6],
    pub first_seen_secs: f64,
    pub last_seen_secs: f64,
}

impl ReportRow {
    fn from_record(key: AggregationKey, record: &TrafficRecord, now: Instant) -> Self {
        Self {
            key,
            message_count: record.message_count,
            byte_count: record.byte_count,
            rates: record.rates.values_at(now),
            first_seen_secs: now.saturating_duration_since(record.first_seen).as_secs_f64(),
            last_seen_secs: now.saturating_duration_since(record.last_seen).as_secs_f64(),
        }
    }

    pub fn message_rate(&self, horizon: Horizon) -> f64 {
        self.rates[horizon.index()]
    }

    pub fn byte_rate(&self, horizon: Horizon) -> f64 {
        self.rates[3 + horizon.index()]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    pub uptime_secs: f64,
    pub total_keys: usize,
    pub global: ReportRow,
    pub rows: Vec<ReportRow>,
}

impl Report {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn rank(a: &ReportRow, b: &ReportRow) -> Ordering {
    b.rates[MSG_SHORT]
        .total_cmp(&a.rates[MSG_SHORT])
        .then_with(|| b.rates[BYTE_SHORT].total_cmp(&a.rates[BYTE_SHORT]))
        .then_with(|| a.key.cmp(&b.key))
}

/// Ranks the snapshot by short-horizon message rate and keeps the first `top_n` rows.
pub fn build_report(snapshot: &TableSnapshot, top_n: usize, now: Instant) -> Report {
    let mut rows: Vec<ReportRow> = snapshot
        .records
        .iter()
        .map(|(k, r)| ReportRow::from_record(k.clone(), r, now))
        .collect();
    rows.sort_by(rank);
    rows.truncate(top_n);

    Report {
        uptime_secs: snapshot.uptime(now).as_secs_f64(),
        total_keys: snapshot.records.len(),
        global: ReportRow::from_record(AggregationKey::global(), &snapshot.global, now),
        rows,
    }
}

pub fn log_summary(report: &Report) {
    let g = &report.global;
    info!(
        messages = g.message_count,
        bytes = g.byte_count,
        keys = report.total_keys,
        msg_rate_1m = g.message_rate(Horizon::Short),
        msg_rate_5m = g.message_rate(Horizon::Medium),
        msg_rate_15m = g.message_rate(Horizon::Long),
        byte_rate_1m = g.byte_rate(Horizon::Short),
        "Traffic"
    );
}

/// `"XX.X KB/s (YYY kbps)"`: kilobytes use 1024, kilobits use 1000.
pub fn format_rate(bytes_per_sec: f64) -> String {
    let kb = bytes_per_sec / 1024.0;
    let kbps = (bytes_per_sec * 8.0 / 1000.0).round();
    format!("{kb:.1} KB/s ({kbps:.0} kbps)")
}

pub fn format_bytes(size: u64) -> String {
    let mut value = size as f64;
    for unit in ["B", "KB", "MB"] {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} GB")
}

pub fn format_age(secs: f64) -> String {
    format!("{secs:.1}s ago")
}
