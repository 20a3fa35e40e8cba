use crate::cadu::CADU_BODY_LEN;
use crate::hrdl::{find_sync, HRDL_LENGTH_OVERHEAD, HRDL_STUFF, HRDL_SYNC};
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, warn};

/// Ceiling on retained bytes: the largest valid packet plus headroom for one
/// more CADU body. A push that would exceed it forces a flush.
pub const DEFAULT_MAX_PENDING: usize = 8 << 20;

#[derive(Debug, Clone)]
pub struct ReassemblerConfig {
    /// Place payloads at their logical offset, zero-filling the bytes lost to
    /// sequence gaps, instead of appending in arrival order.
    pub gap_fill: bool,
    /// Reverse downlink bit-stuffing (`F8 2E 35 AA` -> `F8 2E 35`) on each
    /// newly appended window. Incompatible with gap placement: splicing would
    /// shift the logical offsets.
    pub unstuff: bool,
    pub max_pending: usize,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self { gap_fill: false, unstuff: true, max_pending: DEFAULT_MAX_PENDING }
    }
}

/// Concatenates CADU bodies and cuts the stream into HRDL packets at sync
/// words.
///
/// The buffer holds the bytes of the packet currently being assembled. Once
/// the first sync word is seen the buffer always begins with one; each new
/// body is searched for the next sync word, and every sync-to-sync interval
/// is emitted as one packet. The declared length field caps the emitted
/// slice when a spurious sync-like pattern would otherwise stretch it.
#[derive(Debug)]
pub struct Reassembler {
    config: ReassemblerConfig,
    buf: BytesMut,
    /// Physical index where the next in-order body lands. Tracks `buf.len()`
    /// except transiently around out-of-order placement.
    cursor: i64,
    synced: bool,
    /// Buffer indices below this are replacement output and must not seed
    /// another unstuff match.
    no_restuff_before: usize,
    runts: u64,
    forced_flushes: u64,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(ReassemblerConfig::default())
    }
}

impl Reassembler {
    pub fn new(mut config: ReassemblerConfig) -> Self {
        if config.gap_fill {
            config.unstuff = false;
        }
        Self {
            config,
            buf: BytesMut::with_capacity(4 * CADU_BODY_LEN),
            cursor: 0,
            synced: false,
            no_restuff_before: 0,
            runts: 0,
            forced_flushes: 0,
        }
    }

    /// Feeds one CADU body. `step` is the signed sequence distance to the
    /// previous CADU (1 for a consecutive or first arrival); it only matters
    /// under gap placement. Returns the packets completed by this body.
    pub fn push(&mut self, body: &[u8], step: i64) -> Vec<Bytes> {
        let mut out = Vec::new();

        let mut step = step;
        let growth = if self.config.gap_fill {
            let target = self.cursor + (step - 1) * CADU_BODY_LEN as i64;
            (target + body.len() as i64 - self.buf.len() as i64).max(body.len() as i64)
        } else {
            body.len() as i64
        };
        if self.buf.len() as i64 + growth > self.config.max_pending as i64 {
            out.extend(self.force_flush());
            // The logical position restarts with the emptied buffer.
            step = 1;
        }

        let scan_from = self.place(body, step);
        if self.config.unstuff {
            self.unstuff_from(scan_from);
        }
        // Out-of-order placement can push bytes in front of the sync word.
        if self.synced && (self.buf.len() < 4 || self.buf[..4] != HRDL_SYNC) {
            self.synced = false;
        }
        if !self.synced {
            self.acquire_sync();
        }
        while let Some(packet) = self.try_emit() {
            out.push(packet);
        }
        out
    }

    /// Emits the final sync-to-EOF interval, if any.
    pub fn finish(&mut self) -> Option<Bytes> {
        if !self.synced || self.buf.len() < 8 {
            self.clear();
            return None;
        }
        let declared = self.declared_len();
        let mut tail = self.buf.split();
        tail.truncate(declared.min(tail.len()));
        self.clear();
        Some(tail.freeze())
    }

    /// Retained bytes pending boundary detection.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    pub fn runts(&self) -> u64 {
        self.runts
    }

    pub fn forced_flushes(&self) -> u64 {
        self.forced_flushes
    }

    /// Writes `body` into the buffer and returns the index where raw new
    /// bytes begin, for the unstuff window.
    fn place(&mut self, body: &[u8], step: i64) -> usize {
        let len = self.buf.len() as i64;
        if !self.config.gap_fill {
            self.buf.extend_from_slice(body);
            self.cursor = self.buf.len() as i64;
            return len as usize;
        }

        let q = self.cursor + (step - 1) * CADU_BODY_LEN as i64;
        self.cursor = q + body.len() as i64;
        if q >= len {
            // Append, zero-filling the span lost to the gap.
            self.buf.resize(q as usize, 0);
            self.buf.extend_from_slice(body);
            len as usize
        } else if q >= 0 {
            // Late arrival landing inside the buffer: back-fill in place.
            let q = q as usize;
            let end = q + body.len();
            if end > self.buf.len() {
                self.buf.resize(end, 0);
            }
            self.buf[q..end].copy_from_slice(body);
            q
        } else {
            // Before the buffer start: left-extend with zero fill.
            let lead = (-q) as usize;
            let mut extended = BytesMut::with_capacity(lead + self.buf.len());
            if lead >= body.len() {
                extended.extend_from_slice(body);
                extended.resize(lead, 0);
                extended.extend_from_slice(&self.buf);
            } else {
                extended.extend_from_slice(&body[..]);
                extended.extend_from_slice(&self.buf[body.len() - lead..]);
            }
            let growth = extended.len() - self.buf.len();
            self.buf = extended;
            self.cursor += growth as i64;
            self.no_restuff_before += growth;
            0
        }
    }

    fn unstuff_from(&mut self, appended: usize) {
        let from = appended.saturating_sub(HRDL_STUFF.len() - 1).max(self.no_restuff_before);
        let buf = &mut self.buf;
        let mut read = from;
        let mut write = from;
        let mut last_output = from;
        while read < buf.len() {
            if read + HRDL_STUFF.len() <= buf.len() && buf[read..read + HRDL_STUFF.len()] == HRDL_STUFF {
                buf[write..write + 3].copy_from_slice(&HRDL_STUFF[..3]);
                write += 3;
                read += HRDL_STUFF.len();
                last_output = write;
            } else {
                buf[write] = buf[read];
                write += 1;
                read += 1;
            }
        }
        buf.truncate(write);
        self.cursor = self.buf.len() as i64;
        self.no_restuff_before = last_output;
    }

    /// Discards leading garbage up to the first sync word.
    fn acquire_sync(&mut self) {
        if let Some(ix) = find_sync(&self.buf) {
            self.trim_front(ix);
            self.synced = true;
        }
    }

    fn try_emit(&mut self) -> Option<Bytes> {
        loop {
            if !self.synced || self.buf.len() < 8 || self.buf[..4] != HRDL_SYNC {
                return None;
            }
            // Only the newly extended suffix can hold an unseen sync word;
            // skip the bytes already searched on earlier pushes.
            let mut start = self.buf.len() as i64 - (CADU_BODY_LEN + HRDL_SYNC.len()) as i64;
            if start <= 0 {
                start = HRDL_SYNC.len() as i64;
            }
            let start = start as usize;
            let z = match find_sync(&self.buf[start..]) {
                Some(ix) => start + ix,
                None => return None,
            };
            if z < 8 {
                // Two sync words too close together to hold a header; drop
                // the runt and retry from the next sync.
                warn!("reassembly.event=runt_dropped len={z}");
                self.runts += 1;
                self.trim_front(z);
                continue;
            }
            let declared = self.declared_len();
            let mut packet = self.buf.split_to(z);
            self.after_trim(z);
            packet.truncate(declared.min(packet.len()));
            return Some(packet.freeze());
        }
    }

    fn declared_len(&self) -> usize {
        let size = u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);
        (size as usize).saturating_add(HRDL_LENGTH_OVERHEAD)
    }

    fn force_flush(&mut self) -> Option<Bytes> {
        debug!("reassembly.event=forced_flush pending={}", self.buf.len());
        self.forced_flushes += 1;
        self.finish()
    }

    fn trim_front(&mut self, n: usize) {
        self.buf.advance(n);
        self.after_trim(n);
    }

    fn after_trim(&mut self, n: usize) {
        self.cursor = (self.cursor - n as i64).max(0);
        self.no_restuff_before = self.no_restuff_before.saturating_sub(n);
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.cursor = 0;
        self.synced = false;
        self.no_restuff_before = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, HrdlParams};

    fn body_of(bytes: &[u8]) -> Vec<u8> {
        let mut body = bytes.to_vec();
        body.resize(CADU_BODY_LEN, 0);
        body
    }

    #[test]
    fn packet_within_one_body_emits_on_next_sync() {
        let packet = fixtures::build_hrdl_packet_sized(&HrdlParams::default(), CADU_BODY_LEN);
        let mut r = Reassembler::default();
        assert!(r.push(&packet, 1).is_empty());
        let emitted = r.push(&body_of(&HRDL_SYNC), 1);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].len(), CADU_BODY_LEN);
        assert_eq!(&emitted[0][..], &packet[..]);
    }

    #[test]
    fn packet_spanning_two_bodies() {
        // 2000 on-wire bytes followed by 4 slack bytes the declared length
        // excludes, then the next packet's sync word.
        let packet = fixtures::build_hrdl_packet_sized(&HrdlParams::default(), 2000);
        let mut stream = packet.clone();
        stream.extend_from_slice(&[0xEE; 4]);
        stream.extend_from_slice(&HRDL_SYNC);
        stream.extend_from_slice(&[0u8; 8]);
        assert_eq!(stream.len(), 2 * CADU_BODY_LEN);

        let mut r = Reassembler::default();
        let mut emitted = r.push(&stream[..CADU_BODY_LEN], 1);
        assert!(emitted.is_empty());
        emitted.extend(r.push(&stream[CADU_BODY_LEN..], 1));
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].len(), 2000);
        assert_eq!(&emitted[0][..], &packet[..]);
        // The retained tail starts at the second sync word.
        assert_eq!(r.pending().len(), 12);
        assert!(r.pending().starts_with(&HRDL_SYNC));
    }

    #[test]
    fn declared_length_caps_the_slice() {
        // A sync-like pattern never appears, so the distance to the next sync
        // is long; the size field must win.
        let packet = fixtures::build_hrdl_packet_sized(&HrdlParams::default(), 300);
        let mut stream = packet.clone();
        stream.extend_from_slice(&[0x11; 500]); // slack the size field excludes
        stream.extend_from_slice(&HRDL_SYNC);
        let mut r = Reassembler::default();
        let emitted = r.push(&body_of(&stream), 1);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].len(), 300);
    }

    #[test]
    fn leading_garbage_is_discarded() {
        let packet = fixtures::build_hrdl_packet_sized(&HrdlParams::default(), 200);
        let mut stream = vec![0xABu8; 100];
        stream.extend_from_slice(&packet);
        stream.extend_from_slice(&HRDL_SYNC);
        let mut r = Reassembler::default();
        let emitted = r.push(&body_of(&stream), 1);
        assert_eq!(emitted.len(), 1);
        assert_eq!(&emitted[0][..], &packet[..]);
    }

    #[test]
    fn unstuffing_restores_literal_bytes() {
        // F8 2E 35 01 F8 2E 35 AA 99 -> F8 2E 35 01 F8 2E 35 99 (no sync
        // word appears at offset 4 after reversal).
        let mut r = Reassembler::default();
        let mut body = vec![0xF8, 0x2E, 0x35, 0x01, 0xF8, 0x2E, 0x35, 0xAA, 0x99];
        body.resize(CADU_BODY_LEN, 0);
        r.push(&body, 1);
        assert_eq!(&r.pending()[..8], &[0xF8, 0x2E, 0x35, 0x01, 0xF8, 0x2E, 0x35, 0x99]);
    }

    #[test]
    fn stuffing_spanning_a_body_boundary() {
        let mut first = vec![0u8; CADU_BODY_LEN];
        let n = first.len();
        first[n - 2..].copy_from_slice(&HRDL_STUFF[..2]);
        let mut second = HRDL_STUFF[2..].to_vec();
        second.resize(CADU_BODY_LEN, 0);

        let mut r = Reassembler::default();
        r.push(&first, 1);
        let before = r.pending().len();
        r.push(&second, 1);
        // One octet swallowed by the reversal across the boundary.
        assert_eq!(r.pending().len(), before + CADU_BODY_LEN - 1);
    }

    #[test]
    fn replacement_output_does_not_reseed() {
        // Wire bytes F8 2E 35 AA AA decode to F8 2E 35 AA: the AA landing in
        // the next body must not pair with the replacement output.
        let mut first = vec![0u8; CADU_BODY_LEN];
        let n = first.len();
        first[..4].copy_from_slice(&HRDL_SYNC); // keep the buffer synced
        first[n - 4..].copy_from_slice(&HRDL_STUFF);
        let mut second = vec![0xAAu8, 0x07];
        second.resize(CADU_BODY_LEN, 0);

        let mut r = Reassembler::default();
        r.push(&first, 1);
        let tail_before: Vec<u8> = r.pending()[r.pending().len() - 3..].to_vec();
        assert_eq!(tail_before, vec![0xF8, 0x2E, 0x35]);
        r.push(&second, 1);
        let pend = r.pending();
        let boundary = &pend[pend.len() - CADU_BODY_LEN - 3..][..5];
        assert_eq!(boundary, &[0xF8, 0x2E, 0x35, 0xAA, 0x07]);
    }

    #[test]
    fn gap_fill_inserts_zero_span() {
        let mut r = Reassembler::new(ReassemblerConfig { gap_fill: true, ..Default::default() });
        let mut first = HRDL_SYNC.to_vec();
        first.extend_from_slice(&u32::to_le_bytes(10_000)); // larger than anything here
        let first = body_of(&first);
        r.push(&first, 1);
        // Sequences jump by 4: three bodies lost, three bodies of zero fill.
        r.push(&body_of(&[0x55; 16]), 4);
        assert_eq!(r.pending().len(), 5 * CADU_BODY_LEN);
        assert_eq!(&r.pending()[CADU_BODY_LEN..2 * CADU_BODY_LEN], &[0u8; CADU_BODY_LEN][..]);
    }

    #[test]
    fn gap_fill_backfills_late_arrival() {
        let mut r = Reassembler::new(ReassemblerConfig { gap_fill: true, ..Default::default() });
        let mut first = HRDL_SYNC.to_vec();
        first.extend_from_slice(&u32::to_le_bytes(10_000));
        r.push(&body_of(&first), 1);
        r.push(&body_of(&[0u8; 4]), 2); // gap of one body
        let late = body_of(&[0x77; CADU_BODY_LEN]);
        r.push(&late, -1); // the missing body arrives late
        assert_eq!(&r.pending()[CADU_BODY_LEN..2 * CADU_BODY_LEN], &late[..]);
        assert_eq!(r.pending().len(), 3 * CADU_BODY_LEN);
    }

    #[test]
    fn runt_interval_is_skipped() {
        // Two sync words four bytes apart: no room for a header between them
        // (the packet itself opens with the second one).
        let mut body = HRDL_SYNC.to_vec();
        let packet = fixtures::build_hrdl_packet_sized(&HrdlParams::default(), 64);
        body.extend_from_slice(&packet);
        body.extend_from_slice(&HRDL_SYNC);
        let mut r = Reassembler::default();
        let emitted = r.push(&body_of(&body), 1);
        assert_eq!(r.runts(), 1);
        assert_eq!(emitted.len(), 1);
        assert_eq!(&emitted[0][..], &packet[..]);
    }

    #[test]
    fn finish_emits_the_tail() {
        let packet = fixtures::build_hrdl_packet_sized(&HrdlParams::default(), 128);
        let mut r = Reassembler::default();
        r.push(&body_of(&packet), 1);
        let tail = r.finish().expect("tail emitted");
        assert_eq!(&tail[..], &packet[..]);
        assert!(r.pending().is_empty());
        assert!(r.finish().is_none());
    }

    #[test]
    fn ceiling_forces_a_flush() {
        let mut r = Reassembler::new(ReassemblerConfig {
            max_pending: 3 * CADU_BODY_LEN,
            ..Default::default()
        });
        let mut first = HRDL_SYNC.to_vec();
        first.extend_from_slice(&u32::to_le_bytes(100_000));
        r.push(&body_of(&first), 1);
        r.push(&[0x44; CADU_BODY_LEN], 1);
        r.push(&[0x44; CADU_BODY_LEN], 1);
        let emitted = r.push(&[0x44; CADU_BODY_LEN], 1);
        assert_eq!(r.forced_flushes(), 1);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].len(), 3 * CADU_BODY_LEN);
        assert_eq!(r.pending().len(), CADU_BODY_LEN);
    }
}
