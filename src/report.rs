use crate::cadu::{GapRecord, GapTracker, TimedCadu};
use crate::hrdl::accounting::AccountSummary;
use crate::hrdl::packet::VmuHeader;
use crate::metrics::MetricsSnapshot;
use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::Serialize;
use std::collections::HashMap;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn fmt_time(when: DateTime<Utc>) -> String {
    when.format(TIME_FORMAT).to_string()
}

pub fn fmt_duration(d: Duration) -> String {
    format!("{:.3}s", d.num_milliseconds() as f64 / 1000.0)
}

/// VMU sources 0x61..=0x66 are playback channels; everything else arrives in
/// realtime.
pub fn key_mode(key: u16) -> &'static str {
    if (0x61..=0x66).contains(&(key >> 8)) {
        "pb"
    } else {
        "rt"
    }
}

pub fn print_cadu_row(index: u64, timed: &TimedCadu, missing: u32, elapsed: Duration, total: Duration) {
    let h = &timed.cadu.header;
    let err = timed
        .cadu
        .error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:8} | {} | {:>12} | {:>12} | {:<3} | {:<3} | {:<3} | {:<12} | {:>6} | {:04x} | {:04x} | {:04x} | {:>4} | {}",
        index,
        fmt_time(timed.reception),
        fmt_duration(elapsed),
        fmt_duration(total),
        h.version,
        h.spacecraft,
        h.channel,
        h.sequence,
        h.replay,
        h.control,
        h.pointer,
        timed.cadu.crc,
        missing,
        err,
    );
}

pub fn print_cadu_summary(tracker: &GapTracker) {
    println!(
        "{} cadus found ({} missing, {} corrupted - total time {})",
        tracker.count(),
        tracker.missing(),
        tracker.corrupted(),
        fmt_duration(tracker.elapsed()),
    );
}

pub fn print_gap_row(gap: &GapRecord) {
    println!(
        "{} | {} | {:>8} | {:>8} | {:>4} | {}",
        fmt_time(gap.previous_reception),
        fmt_time(gap.reception),
        gap.previous_sequence,
        gap.sequence,
        gap.missing,
        fmt_duration(gap.elapsed),
    );
}

pub fn print_gap_summary(tracker: &GapTracker, in_gaps: Duration, wall: Duration) {
    println!();
    println!(
        "{}/{} missing cadus ({}/{})",
        tracker.missing(),
        tracker.count(),
        fmt_duration(in_gaps),
        fmt_duration(wall),
    );
}

pub fn print_packet_summary(summary: &AccountSummary) {
    println!("status by {}(s):", summary.selector);
    let mut total_count = 0u64;
    let mut total_bad = 0u64;
    let mut total_size = 0u64;
    for entry in &summary.status {
        let c = &entry.status;
        total_count += c.count;
        total_bad += c.bad;
        total_size += c.size;
        println!(
            "{}({}) {:02x} = {:8}: {:6} bad, {:8} length error (big: {:6}, small: {:6}), {:9}KB",
            summary.selector,
            key_mode(entry.key),
            entry.key & 0xFF,
            c.count,
            c.bad,
            c.bigger + c.smaller,
            c.bigger,
            c.smaller,
            c.size >> 10,
        );
    }

    println!();
    println!("sequence check by {}(s):", summary.selector);
    for entry in &summary.reports {
        let r = &entry.report;
        println!(
            "{}({}) {:02x}: first: {:10} - last: {:10} - missing: {:10}",
            summary.selector,
            key_mode(entry.key),
            entry.key & 0xFF,
            r.first,
            r.last,
            r.missing,
        );
    }
    println!();
    println!(
        "{} VMU packets ({} bad, {}KB)",
        total_count,
        total_bad,
        total_size >> 10
    );
    if summary.skipped > 0 || summary.runts > 0 {
        println!("{} slices skipped, {} runts", summary.skipped, summary.runts);
    }
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    #[serde(flatten)]
    accounting: &'a AccountSummary,
    metrics: MetricsSnapshot,
}

pub fn packet_summary_json(summary: &AccountSummary, metrics: MetricsSnapshot) -> String {
    serde_json::to_string_pretty(&JsonSummary { accounting: summary, metrics })
        .unwrap_or_else(|err| format!("{{\"error\": \"{err}\"}}"))
}

/// `raw` debug hook: header regions of an emitted slice hex-dumped, with the
/// declared size and checksum tail.
pub fn debug_raw(index: u64, slice: &[u8]) {
    if slice.len() < 52 {
        warn!("report.event=short_slice len={}", slice.len());
        return;
    }
    let declared = u32::from_le_bytes(slice[4..8].try_into().unwrap());
    println!(
        "{:6} | {} | {} | {} | {} | {:12} | {:12}",
        index,
        faster_hex::hex_string(&slice[..8]),
        faster_hex::hex_string(&slice[8..24]),
        faster_hex::hex_string(&slice[24..48]),
        faster_hex::hex_string(&slice[slice.len() - 4..]),
        declared,
        slice.len() - 12,
    );
}

/// `header` debug hook: fully decoded VMU header rows with a running
/// per-channel sequence delta.
#[derive(Debug, Default)]
pub struct HeaderDump {
    deltas: HashMap<u8, u32>,
}

impl HeaderDump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print(&mut self, index: u64, slice: &[u8]) {
        let header = match VmuHeader::parse(slice) {
            Ok(header) => header,
            Err(err) => {
                warn!("report.event=undecodable_slice reason={err}");
                return;
            }
        };
        let delta = match self.deltas.get(&header.channel) {
            Some(&last) if last.wrapping_add(1) != header.sequence => {
                crate::hrdl::accounting::hrdl_delta(header.sequence, last)
            }
            _ => 0,
        };
        self.deltas.insert(header.channel, header.sequence);

        println!(
            "{:6} | {:7} | {:02x} | {} | {:9} | {:6} | {} | {} | {:02x} | {:02x} | {:7} | {:2} | {:2} | {}",
            index,
            header.size,
            header.channel,
            fmt_time(header.timestamp()),
            header.sequence,
            delta,
            fmt_time(header.acquisition()),
            header.auxiliary().format("%H:%M:%S%.3f"),
            header.source,
            header.origin,
            header.counter,
            header.packet_type(),
            header.subtype(),
            header.upi.as_deref().unwrap_or("UNKNOWN"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_sources_annotated() {
        assert_eq!(key_mode(0x6145), "pb");
        assert_eq!(key_mode(0x6645), "pb");
        assert_eq!(key_mode(0x0A), "rt");
        assert_eq!(key_mode(0x6745), "rt");
    }

    #[test]
    fn durations_render_as_seconds() {
        assert_eq!(fmt_duration(Duration::milliseconds(2504)), "2.504s");
        assert_eq!(fmt_duration(Duration::zero()), "0.000s");
    }
}
