pub mod decoder;
pub mod gaps;

pub use decoder::{decode_cadu, CaduDecoder, DecodeError};
pub use gaps::{GapRecord, GapTracker};

use chrono::{DateTime, Duration, Utc};
use bytes::Bytes;
use thiserror::Error;

/// On-wire length of one CADU.
pub const CADU_LEN: usize = 1024;
/// CCSDS attached sync marker opening every CADU.
pub const CADU_SYNC: [u8; 4] = [0x1A, 0xCF, 0xFC, 0x1D];
/// Header length, sync word included.
pub const CADU_HEADER_LEN: usize = 14;
/// Trailing frame check sequence length.
pub const CADU_CRC_LEN: usize = 2;
/// Transfer-frame body carried by each CADU.
pub const CADU_BODY_LEN: usize = CADU_LEN - CADU_HEADER_LEN - CADU_CRC_LEN;
/// The virtual-channel counter wraps modulo 2^24.
pub const SEQUENCE_MODULUS: u32 = 1 << 24;
/// Optional per-CADU reception-timestamp prefix written by HRDFE capture
/// front-ends.
pub const HRDFE_PREFIX_LEN: usize = 8;

/// Decoded CADU header fields. `pid` is unpacked into version, spacecraft and
/// virtual channel; the sequence word into the 24-bit counter and replay flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaduHeader {
    pub version: u8,
    pub spacecraft: u8,
    pub channel: u8,
    pub sequence: u32,
    pub replay: bool,
    pub control: u16,
    pub pointer: u16,
}

/// Frame check failure. Carried on the CADU rather than raised: corrupted
/// frames still flow downstream and are only counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid checksum: want {want:04x}, got {got:04x}")]
pub struct ChecksumMismatch {
    pub want: u16,
    pub got: u16,
}

#[derive(Debug, Clone)]
pub struct Cadu {
    pub header: CaduHeader,
    pub payload: Bytes,
    pub crc: u16,
    pub error: Option<ChecksumMismatch>,
}

impl Cadu {
    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    /// Count of virtual-channel counter steps lost between `previous` and
    /// `self`, zero when the counters are consecutive. See [`sequence_gap`].
    pub fn missing_after(&self, previous: Option<&Cadu>) -> u32 {
        match previous {
            Some(prev) => sequence_gap(self.header.sequence, prev.header.sequence),
            None => 0,
        }
    }
}

/// Missing count between two consecutive arrivals of the 24-bit wrapping
/// counter. Consecutive frames (`current == previous + 1 mod 2^24`) yield 0;
/// any other distance is reported as the full modular delta.
pub fn sequence_gap(current: u32, previous: u32) -> u32 {
    let delta = current.wrapping_sub(previous) & (SEQUENCE_MODULUS - 1);
    if delta > 1 {
        delta
    } else {
        0
    }
}

/// Signed placement step between two arrivals, for gap-aware reassembly.
/// Interprets the modular delta as a two's-complement 24-bit offset so a
/// small backwards step (an out-of-order arrival) comes out negative rather
/// than as a near-full-cycle jump.
pub fn sequence_step(current: u32, previous: u32) -> i64 {
    let delta = current.wrapping_sub(previous) & (SEQUENCE_MODULUS - 1);
    if delta >= SEQUENCE_MODULUS / 2 {
        delta as i64 - SEQUENCE_MODULUS as i64
    } else {
        delta as i64
    }
}

/// A CADU annotated with the reception timestamp assigned by its byte source.
#[derive(Debug, Clone)]
pub struct TimedCadu {
    pub cadu: Cadu,
    pub reception: DateTime<Utc>,
}

impl TimedCadu {
    pub fn missing_after(&self, previous: Option<&TimedCadu>) -> u32 {
        self.cadu.missing_after(previous.map(|p| &p.cadu))
    }

    /// Absolute wall-clock distance between two receptions.
    pub fn elapsed_since(&self, previous: Option<&TimedCadu>) -> Duration {
        match previous {
            Some(prev) => (self.reception - prev.reception).abs(),
            None => Duration::zero(),
        }
    }
}
