//! Boundary scenarios for the decode -> reassemble -> account chain, driven
//! end to end from synthesized wire frames.

use hrdl_ingest::cadu::{decode_cadu, TimedCadu, CADU_BODY_LEN};
use hrdl_ingest::cadu::GapTracker;
use hrdl_ingest::fixtures::{self, HrdlParams};
use hrdl_ingest::hrdl::accounting::{Accountant, Selector};
use hrdl_ingest::hrdl::packet;
use hrdl_ingest::hrdl::reassembler::{Reassembler, ReassemblerConfig};
use hrdl_ingest::hrdl::HRDL_SYNC;
use chrono::{DateTime, Utc};
use std::io::Cursor;

fn decode(frame: &[u8]) -> hrdl_ingest::cadu::Cadu {
    decode_cadu(&mut Cursor::new(frame)).expect("frame decodes")
}

fn timed(frame: &[u8], at_ms: i64) -> TimedCadu {
    TimedCadu {
        cadu: decode(frame),
        reception: DateTime::<Utc>::from_timestamp_millis(at_ms).unwrap(),
    }
}

fn reassemble_frames(frames: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut r = Reassembler::default();
    let mut out = Vec::new();
    for frame in frames {
        let cadu = decode(frame);
        out.extend(r.push(&cadu.payload, 1).into_iter().map(|b| b.to_vec()));
    }
    if let Some(tail) = r.finish() {
        out.push(tail.to_vec());
    }
    out
}

#[test]
fn single_clean_cadu_emits_one_packet() {
    // One packet filling CADU #0 exactly; CADU #1 opens the next packet.
    let packet = fixtures::build_hrdl_packet_sized(&HrdlParams::default(), CADU_BODY_LEN);
    let mut next = HRDL_SYNC.to_vec();
    next.resize(CADU_BODY_LEN, 0);

    let mut frames = fixtures::frame_bytes(&packet, 0);
    frames.extend(fixtures::frame_bytes(&next, 1));

    let mut r = Reassembler::default();
    let mut emitted = Vec::new();
    for frame in &frames {
        emitted.extend(r.push(&decode(frame).payload, 1));
    }
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].len(), CADU_BODY_LEN);
    assert!(packet::verify_checksum(&emitted[0]).is_ok());
}

#[test]
fn packet_across_cadu_boundary() {
    // 2000 on-wire bytes spanning two CADUs; 4 slack bytes before the next
    // sync word, which the declared length excludes from the emission.
    let big = fixtures::build_hrdl_packet_sized(&HrdlParams::default(), 2000);
    let mut stream = big.clone();
    stream.extend_from_slice(&[0xEE; 4]);
    stream.extend_from_slice(&HRDL_SYNC);
    stream.extend_from_slice(&[0u8; 8]);
    assert_eq!(stream.len(), 2 * CADU_BODY_LEN);
    let frames = fixtures::frame_bytes(&stream, 0);

    let mut r = Reassembler::default();
    let mut emitted = Vec::new();
    for frame in &frames {
        emitted.extend(r.push(&decode(frame).payload, 1));
    }
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].len(), 2000);
    assert_eq!(&emitted[0][..], &big[..]);
    assert_eq!(r.pending().len(), 12);
    assert!(r.pending().starts_with(&HRDL_SYNC));
}

#[test]
fn gap_of_three_cadus() {
    let frames: Vec<Vec<u8>> = [10u32, 14]
        .iter()
        .map(|&seq| fixtures::build_cadu(seq, &[0u8; CADU_BODY_LEN]))
        .collect();
    let mut tracker = GapTracker::new();
    tracker.observe(&timed(&frames[0], 0));
    let (missing, _, record) = tracker.observe(&timed(&frames[1], 100));
    assert_eq!(missing, 4);
    assert_eq!(record.unwrap().missing, 4);

    // The gap-aware reassembler positions the late payload at its true
    // logical offset, zero-filling the three lost bodies.
    let mut r = Reassembler::new(ReassemblerConfig { gap_fill: true, ..Default::default() });
    let lead = fixtures::build_hrdl_packet_sized(&HrdlParams::default(), 8 * CADU_BODY_LEN);
    r.push(&lead[..CADU_BODY_LEN], 1);
    r.push(&decode(&frames[1]).payload, 4);
    assert_eq!(r.pending().len(), 5 * CADU_BODY_LEN);
    assert_eq!(
        &r.pending()[CADU_BODY_LEN..4 * CADU_BODY_LEN],
        &vec![0u8; 3 * CADU_BODY_LEN][..]
    );
}

#[test]
fn resync_after_loss_recovers_aligned_packets() {
    // Whole packets aligned to CADU bodies; frames 2..=4 are lost in
    // transit. The append-mode reassembler recovers every delivered packet.
    let packets: Vec<Vec<u8>> = (0..6u32)
        .map(|i| {
            fixtures::build_hrdl_packet_sized(
                &HrdlParams { sequence: i + 1, ..Default::default() },
                CADU_BODY_LEN,
            )
        })
        .collect();
    let frames: Vec<Vec<u8>> = packets
        .iter()
        .enumerate()
        .map(|(i, p)| fixtures::build_cadu(i as u32, &p[..].try_into().unwrap()))
        .collect();

    let delivered = [&frames[0], &frames[1], &frames[5]];
    let mut r = Reassembler::default();
    let mut emitted = Vec::new();
    for frame in delivered {
        emitted.extend(r.push(&decode(frame).payload, 1));
    }
    if let Some(tail) = r.finish() {
        emitted.push(tail);
    }
    assert_eq!(emitted.len(), 3);
    assert_eq!(&emitted[0][..], &packets[0][..]);
    assert_eq!(&emitted[1][..], &packets[1][..]);
    assert_eq!(&emitted[2][..], &packets[5][..]);
}

#[test]
fn sequence_wrap_counts_three_missing() {
    let mut tracker = GapTracker::new();
    tracker.observe(&timed(&fixtures::build_cadu(0xFFFFFE, &[0u8; CADU_BODY_LEN]), 0));
    let (missing, _, _) =
        tracker.observe(&timed(&fixtures::build_cadu(0x000001, &[0u8; CADU_BODY_LEN]), 50));
    assert_eq!(missing, 3);
}

#[test]
fn corrupted_crc_flows_through_without_disturbing_gaps() {
    let mut frames: Vec<Vec<u8>> = (0..3u32)
        .map(|seq| fixtures::build_cadu(seq, &[0u8; CADU_BODY_LEN]))
        .collect();
    frames[1][700] ^= 0x04; // flip one payload bit, CRC now stale

    let mut tracker = GapTracker::new();
    for (i, frame) in frames.iter().enumerate() {
        let t = timed(frame, i as i64 * 10);
        if i == 1 {
            assert!(t.cadu.error.is_some());
        }
        let (missing, _, _) = tracker.observe(&t);
        assert_eq!(missing, 0);
    }
    assert_eq!(tracker.corrupted(), 1);
    assert_eq!(tracker.missing(), 0);
    assert_eq!(tracker.count(), 3);
}

#[test]
fn stuffed_stream_roundtrips() {
    // Bodies containing the literal sync prefix survive the stuff/unstuff
    // cycle byte for byte.
    let mut body = Vec::new();
    body.extend_from_slice(&[0xF8, 0x2E, 0x35, 0x01]);
    body.extend_from_slice(&[0x20; 40]);
    body.extend_from_slice(&[0xF8, 0x2E, 0x35, 0xAA, 0x99]);
    let packets: Vec<Vec<u8>> = (1..=3u32)
        .map(|seq| {
            fixtures::build_hrdl_packet(&HrdlParams { sequence: seq, ..Default::default() }, &body)
        })
        .collect();

    let wire: Vec<u8> = packets.iter().flat_map(|p| fixtures::stuff_packet(p)).collect();
    assert!(wire.len() > packets.iter().map(Vec::len).sum::<usize>());
    let frames = fixtures::frame_bytes(&wire, 0);

    let recovered = reassemble_frames(&frames);
    assert_eq!(recovered.len(), 3);
    for (got, want) in recovered.iter().zip(&packets) {
        assert_eq!(got, want);
        assert!(packet::verify_checksum(got).is_ok());
    }
}

#[test]
fn mixed_stream_accounts_by_channel_and_origin() {
    let packets = vec![
        fixtures::build_hrdl_packet_sized(
            &HrdlParams { channel: 1, source: 0x61, origin: 0x41, sequence: 1, counter: 1, ..Default::default() },
            600,
        ),
        fixtures::build_hrdl_packet_sized(
            &HrdlParams { channel: 2, source: 0x38, origin: 0x42, sequence: 1, counter: 5, ..Default::default() },
            900,
        ),
        fixtures::build_hrdl_packet_sized(
            &HrdlParams { channel: 1, source: 0x61, origin: 0x41, sequence: 4, counter: 2, ..Default::default() },
            700,
        ),
    ];
    let frames = fixtures::frame_stream(&packets, 0);
    let slices = reassemble_frames(&frames);
    assert_eq!(slices.len(), 3);

    let mut by_channel = Accountant::new(Selector::Channel);
    let mut by_origin = Accountant::new(Selector::Origin);
    for slice in &slices {
        by_channel.record(slice).unwrap();
        by_origin.record(slice).unwrap();
    }

    let channel = by_channel.into_summary();
    assert_eq!(channel.status.len(), 2);
    let ch1 = channel.reports.iter().find(|r| r.key == 1).unwrap();
    assert_eq!(ch1.report.missing, 3); // sequence 1 -> 4

    let origin = by_origin.into_summary();
    assert_eq!(origin.status.len(), 2);
    let o41 = origin.reports.iter().find(|r| r.key == 0x6141).unwrap();
    assert_eq!(o41.report.first, 1);
    assert_eq!(o41.report.last, 2); // per-origin counter drives the check
    assert_eq!(o41.report.missing, 0);
}
