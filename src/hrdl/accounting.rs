use crate::hrdl::{find_sync, packet, ReassemblyError, HRDL_SYNC};
use crate::hrdl::packet::LengthCheck;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Reporting key derivation: by virtual channel, or by the composite of the
/// VMU source and origin octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Channel,
    Origin,
}

impl Selector {
    pub fn as_str(self) -> &'static str {
        match self {
            Selector::Channel => "channel",
            Selector::Origin => "origin",
        }
    }

    /// Extracts the accounting key and the sequence counter governed by it.
    /// By channel the per-channel sequence field drives the gap check; by
    /// origin it is the per-origin counter. Returns `None` when the slice is
    /// too short to carry the selected fields.
    pub fn key_of(self, slice: &[u8]) -> Option<(u16, u32)> {
        match self {
            Selector::Channel => {
                if slice.len() < 16 {
                    return None;
                }
                let seq = u32::from_le_bytes([slice[12], slice[13], slice[14], slice[15]]);
                Some((slice[8] as u16, seq))
            }
            Selector::Origin => {
                if slice.len() < 48 {
                    return None;
                }
                let seq = u32::from_le_bytes([slice[27], slice[28], slice[29], slice[30]]);
                Some(((slice[9] as u16) << 8 | slice[47] as u16, seq))
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channel" => Ok(Selector::Channel),
            "origin" => Ok(Selector::Origin),
            other => Err(format!("unsupported selector `{other}` (expected channel or origin)")),
        }
    }
}

/// Per-key packet health counters.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct PacketStatus {
    pub count: u64,
    pub size: u64,
    pub bad: u64,
    pub bigger: u64,
    pub smaller: u64,
}

/// Per-key sequence continuity counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SequenceReport {
    pub first: u32,
    pub last: u32,
    pub missing: u64,
    pub count: u64,
}

/// Per-pair delta of the 32-bit HRDL counter. A backwards-looking difference
/// is counted as zero: on rollover this under-counts instead of charging a
/// near-2^32 phantom gap.
pub fn hrdl_delta(sequence: u32, last: u32) -> u64 {
    if sequence == last.wrapping_add(1) {
        0
    } else if sequence > last {
        (sequence - last) as u64
    } else {
        0
    }
}

/// One accounted packet, for debug hooks and row printers.
#[derive(Debug, Clone, Copy)]
pub struct PacketRecord {
    pub key: u16,
    pub sequence: u32,
    pub declared: u32,
    pub on_wire: usize,
    pub checksum_ok: bool,
    pub length: LengthCheck,
}

/// End-of-stream view of the accounting maps, keys sorted.
#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub selector: String,
    pub status: Vec<KeyedStatus>,
    pub reports: Vec<KeyedReport>,
    pub skipped: u64,
    pub runts: u64,
}

#[derive(Debug, Serialize)]
pub struct KeyedStatus {
    pub key: u16,
    #[serde(flatten)]
    pub status: PacketStatus,
}

#[derive(Debug, Serialize)]
pub struct KeyedReport {
    pub key: u16,
    #[serde(flatten)]
    pub report: SequenceReport,
}

/// Consumes emitted HRDL slices and maintains the status and sequence maps.
/// Integrity faults are counted, never fatal; inconsistent slices (wrong or
/// duplicated sync word) are skipped and the stream continues.
#[derive(Debug)]
pub struct Accountant {
    selector: Selector,
    status: HashMap<u16, PacketStatus>,
    reports: HashMap<u16, SequenceReport>,
    skipped: u64,
    runts: u64,
}

impl Accountant {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            status: HashMap::new(),
            reports: HashMap::new(),
            skipped: 0,
            runts: 0,
        }
    }

    pub fn selector(&self) -> Selector {
        self.selector
    }

    pub fn record(&mut self, slice: &[u8]) -> Result<Option<PacketRecord>, ReassemblyError> {
        if slice.len() < HRDL_SYNC.len() || slice[..HRDL_SYNC.len()] != HRDL_SYNC {
            self.skipped += 1;
            return Err(ReassemblyError::MissingSyncword);
        }
        if find_sync(&slice[HRDL_SYNC.len()..]).is_some() {
            self.skipped += 1;
            return Err(ReassemblyError::MultipleSyncword);
        }
        let Some((key, sequence)) = self.selector.key_of(slice) else {
            self.runts += 1;
            return Ok(None);
        };

        let declared = u32::from_le_bytes([slice[4], slice[5], slice[6], slice[7]]);
        let checksum_ok = slice.len() >= 12 && packet::verify_checksum(slice).is_ok();
        let length = packet::length_check(declared, slice.len());

        let status = self.status.entry(key).or_default();
        status.count += 1;
        status.size += slice.len() as u64;
        if !checksum_ok {
            status.bad += 1;
        }
        match length {
            LengthCheck::Exact => {}
            LengthCheck::Bigger => status.bigger += 1,
            LengthCheck::Smaller => status.smaller += 1,
        }

        let report = self
            .reports
            .entry(key)
            .and_modify(|r| {
                r.missing += hrdl_delta(sequence, r.last);
                r.last = sequence;
            })
            .or_insert(SequenceReport { first: sequence, last: sequence, missing: 0, count: 0 });
        report.count += 1;

        Ok(Some(PacketRecord { key, sequence, declared, on_wire: slice.len(), checksum_ok, length }))
    }

    pub fn status(&self) -> &HashMap<u16, PacketStatus> {
        &self.status
    }

    pub fn reports(&self) -> &HashMap<u16, SequenceReport> {
        &self.reports
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn into_summary(self) -> AccountSummary {
        let mut status: Vec<KeyedStatus> =
            self.status.into_iter().map(|(key, status)| KeyedStatus { key, status }).collect();
        status.sort_by_key(|entry| entry.key);
        let mut reports: Vec<KeyedReport> =
            self.reports.into_iter().map(|(key, report)| KeyedReport { key, report }).collect();
        reports.sort_by_key(|entry| entry.key);
        AccountSummary {
            selector: self.selector.as_str().to_string(),
            status,
            reports,
            skipped: self.skipped,
            runts: self.runts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, HrdlParams};

    fn packet(channel: u8, source: u8, origin: u8, sequence: u32, counter: u32) -> Vec<u8> {
        fixtures::build_hrdl_packet(
            &HrdlParams { channel, source, origin, sequence, counter, ..Default::default() },
            &[0u8; 32],
        )
    }

    #[test]
    fn channel_key_and_sequence() {
        let mut acc = Accountant::new(Selector::Channel);
        let record = acc.record(&packet(0x0A, 1, 2, 100, 0)).unwrap().unwrap();
        assert_eq!(record.key, 0x0A);
        assert_eq!(record.sequence, 100);
        assert!(record.checksum_ok);
        assert_eq!(acc.status()[&0x0A].count, 1);
    }

    #[test]
    fn origin_key_composes_source_and_origin() {
        let mut acc = Accountant::new(Selector::Origin);
        let record = acc.record(&packet(1, 0x61, 0x45, 9, 777)).unwrap().unwrap();
        assert_eq!(record.key, 0x6145);
        // By origin, the per-origin counter drives the sequence check.
        assert_eq!(record.sequence, 777);
    }

    #[test]
    fn sequence_gap_accumulates_per_key() {
        let mut acc = Accountant::new(Selector::Channel);
        for seq in [10u32, 11, 15, 16] {
            acc.record(&packet(1, 0, 0, seq, 0)).unwrap();
        }
        let report = &acc.reports()[&1];
        assert_eq!(report.first, 10);
        assert_eq!(report.last, 16);
        assert_eq!(report.missing, 4); // 15 - 11
        assert_eq!(report.count, 4);
    }

    #[test]
    fn backwards_jump_is_ignored() {
        // Deliberate under-count on 32-bit rollover and reordering.
        assert_eq!(hrdl_delta(5, 10), 0);
        assert_eq!(hrdl_delta(0, u32::MAX), 0);
        assert_eq!(hrdl_delta(14, 10), 4);
        assert_eq!(hrdl_delta(11, 10), 0);
    }

    #[test]
    fn corrupt_checksum_counts_bad() {
        let mut acc = Accountant::new(Selector::Channel);
        let mut bad = packet(3, 0, 0, 1, 0);
        bad[30] ^= 0xFF;
        let record = acc.record(&bad).unwrap().unwrap();
        assert!(!record.checksum_ok);
        assert_eq!(acc.status()[&3].bad, 1);
        assert_eq!(acc.status()[&3].count, 1);
    }

    #[test]
    fn length_mismatches_are_classified() {
        let mut acc = Accountant::new(Selector::Channel);
        let mut truncated = packet(2, 0, 0, 1, 0);
        truncated.truncate(truncated.len() - 4);
        acc.record(&truncated).unwrap();
        let mut padded = packet(2, 0, 0, 2, 0);
        padded.extend_from_slice(&[0u8; 6]);
        acc.record(&padded).unwrap();
        let status = &acc.status()[&2];
        assert_eq!(status.smaller, 1);
        assert_eq!(status.bigger, 1);
    }

    #[test]
    fn inconsistent_slices_are_skipped() {
        let mut acc = Accountant::new(Selector::Channel);
        assert_eq!(
            acc.record(&[0u8; 32]).unwrap_err(),
            ReassemblyError::MissingSyncword
        );
        let mut doubled = packet(1, 0, 0, 1, 0);
        doubled.extend_from_slice(&HRDL_SYNC);
        assert_eq!(
            acc.record(&doubled).unwrap_err(),
            ReassemblyError::MultipleSyncword
        );
        assert_eq!(acc.skipped(), 2);
        assert!(acc.status().is_empty());
    }

    #[test]
    fn summary_sorts_keys() {
        let mut acc = Accountant::new(Selector::Channel);
        for channel in [9u8, 3, 7] {
            acc.record(&packet(channel, 0, 0, 1, 0)).unwrap();
        }
        let summary = acc.into_summary();
        let keys: Vec<u16> = summary.status.iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![3, 7, 9]);
    }
}
