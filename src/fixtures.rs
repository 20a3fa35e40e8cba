//! Deterministic frame and packet builders shared by the test suite and the
//! `hrdl-feed` traffic generator.

use crate::cadu::{CADU_BODY_LEN, CADU_LEN, CADU_SYNC, SEQUENCE_MODULUS};
use crate::crc;
use crate::hrdl::{HRDL_LENGTH_OVERHEAD, HRDL_SYNC};

/// Default CADU identity used when generating traffic.
pub const DEFAULT_VERSION: u8 = 1;
pub const DEFAULT_SPACECRAFT: u8 = 23;
pub const DEFAULT_CHANNEL: u8 = 7;
pub const DEFAULT_CONTROL: u16 = 0xFDC3;
pub const DEFAULT_POINTER: u16 = 0x3FFF;

/// Frames one 1008-octet body into a complete CADU with a valid CRC.
pub fn build_cadu(sequence: u32, body: &[u8; CADU_BODY_LEN]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(CADU_LEN);
    frame.extend_from_slice(&CADU_SYNC);
    let pid = (DEFAULT_VERSION as u16) << 14 | (DEFAULT_SPACECRAFT as u16) << 6 | DEFAULT_CHANNEL as u16;
    frame.extend_from_slice(&pid.to_be_bytes());
    frame.extend_from_slice(&((sequence % SEQUENCE_MODULUS) << 8).to_be_bytes());
    frame.extend_from_slice(&DEFAULT_CONTROL.to_be_bytes());
    frame.extend_from_slice(&DEFAULT_POINTER.to_be_bytes());
    frame.extend_from_slice(body);
    let crc = crc::checksum(&frame[4..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Recomputes the CRC of a complete frame after in-place edits.
pub fn reseal_cadu(frame: &mut [u8]) {
    assert_eq!(frame.len(), CADU_LEN);
    let crc = crc::checksum(&frame[4..CADU_LEN - 2]);
    frame[CADU_LEN - 2..].copy_from_slice(&crc.to_be_bytes());
}

/// HRDL header fields for synthesized packets.
#[derive(Debug, Clone, Copy)]
pub struct HrdlParams {
    pub channel: u8,
    pub source: u8,
    pub origin: u8,
    pub sequence: u32,
    pub counter: u32,
    pub coarse: u32,
    pub fine: u16,
    pub property: u8,
    pub stream: u16,
    pub acq_time: i64,
    pub aux_time: i64,
    pub upi: &'static str,
}

impl Default for HrdlParams {
    fn default() -> Self {
        Self {
            channel: 1,
            source: 0x35,
            origin: 0x39,
            sequence: 1,
            counter: 1,
            coarse: 1_000_000,
            fine: 0x4000,
            property: 0,
            stream: 0,
            acq_time: 0,
            aux_time: 0,
            upi: "TEST",
        }
    }
}

/// Builds a complete HRDL packet around `body`: header, optional UPI block,
/// body, trailing checksum. The size field is set to the on-wire length minus
/// the 12-octet overhead.
pub fn build_hrdl_packet(params: &HrdlParams, body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(64 + body.len());
    packet.extend_from_slice(&HRDL_SYNC);
    packet.extend_from_slice(&[0u8; 4]); // size, patched below
    packet.push(params.channel);
    packet.push(params.source);
    packet.extend_from_slice(&[0u8; 2]);
    packet.extend_from_slice(&params.sequence.to_le_bytes());
    packet.extend_from_slice(&params.coarse.to_le_bytes());
    packet.extend_from_slice(&params.fine.to_le_bytes());
    packet.extend_from_slice(&[0u8; 2]);
    packet.push(params.property);
    packet.extend_from_slice(&params.stream.to_le_bytes());
    packet.extend_from_slice(&params.counter.to_le_bytes());
    packet.extend_from_slice(&params.acq_time.to_le_bytes());
    packet.extend_from_slice(&params.aux_time.to_le_bytes());
    packet.push(params.origin);
    match params.property >> 4 {
        1 => push_upi(&mut packet, params.upi),
        2 => {
            packet.extend_from_slice(&[0u8; 20]);
            push_upi(&mut packet, params.upi);
        }
        _ => {}
    }
    packet.extend_from_slice(body);

    let size = (packet.len() + 4 - HRDL_LENGTH_OVERHEAD) as u32;
    packet[4..8].copy_from_slice(&size.to_le_bytes());
    let sum: u32 = packet[8..].iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32));
    packet.extend_from_slice(&sum.to_le_bytes());
    packet
}

/// Builds a packet of an exact on-wire length by sizing the body filler.
/// The filler cycles below 0xF8 so neither the sync word nor the stuffing
/// marker can appear by accident.
pub fn build_hrdl_packet_sized(params: &HrdlParams, total: usize) -> Vec<u8> {
    let skeleton = build_hrdl_packet(params, &[]);
    let body_len = total.checked_sub(skeleton.len()).expect("total below header length");
    let body: Vec<u8> = (0..body_len).map(|i| (i % 0xF0) as u8).collect();
    let packet = build_hrdl_packet(params, &body);
    assert_eq!(packet.len(), total);
    packet
}

fn push_upi(packet: &mut Vec<u8>, upi: &str) {
    let mut block = [0u8; 32];
    let n = upi.len().min(32);
    block[..n].copy_from_slice(&upi.as_bytes()[..n]);
    packet.extend_from_slice(&block);
}

/// Downlink-side bit stuffing: every literal `F8 2E 35` grows a trailing
/// `AA`. Inverse of the reassembler's reversal.
pub fn stuff(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + bytes.len() / 64);
    let mut i = 0;
    while i < bytes.len() {
        if bytes.len() - i >= 3 && bytes[i..i + 3] == HRDL_SYNC[..3] {
            out.extend_from_slice(&HRDL_SYNC[..3]);
            out.push(0xAA);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

/// Stuffs a packet the way the link layer does: the leading sync word stays
/// literal, everything after it is transformed.
pub fn stuff_packet(packet: &[u8]) -> Vec<u8> {
    let mut out = HRDL_SYNC.to_vec();
    out.extend_from_slice(&stuff(&packet[HRDL_SYNC.len()..]));
    out
}

/// Concatenates packets into a byte stream and frames it into CADUs with
/// consecutive sequence numbers, zero-padding the final body.
pub fn frame_stream(packets: &[Vec<u8>], first_sequence: u32) -> Vec<Vec<u8>> {
    let stream: Vec<u8> = packets.iter().flatten().copied().collect();
    frame_bytes(&stream, first_sequence)
}

/// Frames an arbitrary byte stream into CADUs, zero-padding the final body.
pub fn frame_bytes(stream: &[u8], first_sequence: u32) -> Vec<Vec<u8>> {
    stream
        .chunks(CADU_BODY_LEN)
        .enumerate()
        .map(|(i, chunk)| {
            let mut body = [0u8; CADU_BODY_LEN];
            body[..chunk.len()].copy_from_slice(chunk);
            build_cadu(first_sequence.wrapping_add(i as u32), &body)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_frames_have_valid_crc() {
        let frame = build_cadu(5, &[0x11; CADU_BODY_LEN]);
        assert_eq!(frame.len(), CADU_LEN);
        let crc = crc::checksum(&frame[4..CADU_LEN - 2]);
        assert_eq!(&frame[CADU_LEN - 2..], &crc.to_be_bytes());
    }

    #[test]
    fn built_packets_verify() {
        let packet = build_hrdl_packet(&HrdlParams::default(), &[1, 2, 3]);
        assert!(crate::hrdl::packet::verify_checksum(&packet).is_ok());
        let declared = u32::from_le_bytes(packet[4..8].try_into().unwrap());
        assert_eq!(declared as usize, packet.len() - HRDL_LENGTH_OVERHEAD);
    }

    #[test]
    fn stuffing_roundtrip() {
        let data = vec![0x00, 0xF8, 0x2E, 0x35, 0x07, 0xF8, 0x2E, 0x35];
        let stuffed = stuff(&data);
        assert_eq!(
            stuffed,
            vec![0x00, 0xF8, 0x2E, 0x35, 0xAA, 0x07, 0xF8, 0x2E, 0x35, 0xAA]
        );
    }

    #[test]
    fn frame_stream_pads_the_tail() {
        let packets = vec![build_hrdl_packet_sized(&HrdlParams::default(), 1500)];
        let frames = frame_stream(&packets, 0);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == CADU_LEN));
    }
}
