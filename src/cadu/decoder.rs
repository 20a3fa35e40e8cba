use crate::cadu::{
    Cadu, CaduHeader, ChecksumMismatch, TimedCadu, CADU_BODY_LEN, CADU_CRC_LEN, CADU_HEADER_LEN,
    CADU_LEN, HRDFE_PREFIX_LEN,
};
use crate::crc;
use crate::gps;
use bytes::Bytes;
use chrono::Utc;
use std::io::{self, Read};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Clean end of stream on a frame boundary.
    #[error("end of stream")]
    Eof,
    /// The stream ended inside a frame. Treated as end of stream by callers,
    /// surfaced separately so they can log the misalignment.
    #[error("truncated frame after {0} bytes")]
    Truncated(usize),
    #[error("frame read failed: {0}")]
    Io(#[from] io::Error),
}

/// Reads until `buf` is full or the stream ends, returning how many bytes
/// landed. Unlike `read_exact` the caller learns the partial count.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Pulls exactly one CADU (1024 octets) off `reader`.
///
/// The frame is returned even when its check sequence does not match; the
/// mismatch rides along in `Cadu::error` and policy stays with the caller.
/// Frame alignment is assumed: there is no sync-word hunt here, a misaligned
/// stream simply fails its CRC downstream.
pub fn decode_cadu<R: Read>(reader: &mut R) -> Result<Cadu, DecodeError> {
    let mut sync = [0u8; 4];
    match fill(reader, &mut sync)? {
        0 => return Err(DecodeError::Eof),
        4 => {}
        n => return Err(DecodeError::Truncated(n)),
    }

    // Everything between the sync word and the CRC is protected: the ten
    // remaining header octets plus the 1008-octet body.
    let mut rest = [0u8; CADU_LEN - 4];
    let got = fill(reader, &mut rest)?;
    if got != rest.len() {
        return Err(DecodeError::Truncated(4 + got));
    }
    let protected = &rest[..CADU_LEN - 4 - CADU_CRC_LEN];

    let pid = u16::from_be_bytes([rest[0], rest[1]]);
    let seq_word = u32::from_be_bytes([rest[2], rest[3], rest[4], rest[5]]);
    let header = CaduHeader {
        version: ((pid & 0xC000) >> 14) as u8,
        spacecraft: ((pid & 0x3FC0) >> 6) as u8,
        channel: (pid & 0x003F) as u8,
        sequence: seq_word >> 8,
        replay: (seq_word >> 7) & 1 == 1,
        control: u16::from_be_bytes([rest[6], rest[7]]),
        pointer: u16::from_be_bytes([rest[8], rest[9]]),
    };

    let body_start = CADU_HEADER_LEN - 4;
    let payload = Bytes::copy_from_slice(&rest[body_start..body_start + CADU_BODY_LEN]);
    let want = u16::from_be_bytes([rest[CADU_LEN - 6], rest[CADU_LEN - 5]]);
    let got = crc::checksum(protected);

    Ok(Cadu {
        header,
        payload,
        crc: want,
        error: (want != got).then_some(ChecksumMismatch { want, got }),
    })
}

/// Blocking frame puller for continuous byte streams (files, file chains).
/// Optionally strips an 8-octet HRDFE prefix ahead of every frame and uses it
/// as the reception timestamp; otherwise frames are stamped with the wall
/// clock at decode time.
pub struct CaduDecoder<R> {
    inner: R,
    hrdfe: bool,
}

impl<R: Read> CaduDecoder<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, hrdfe: false }
    }

    pub fn with_hrdfe(inner: R) -> Self {
        Self { inner, hrdfe: true }
    }

    pub fn next_timed(&mut self) -> Result<TimedCadu, DecodeError> {
        let reception = if self.hrdfe {
            let mut prefix = [0u8; HRDFE_PREFIX_LEN];
            match fill(&mut self.inner, &mut prefix)? {
                0 => return Err(DecodeError::Eof),
                HRDFE_PREFIX_LEN => {}
                n => return Err(DecodeError::Truncated(n)),
            }
            let coarse = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
            let fine = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
            gps::hrdfe_timestamp(coarse, fine)
        } else {
            Utc::now()
        };
        let cadu = decode_cadu(&mut self.inner)?;
        Ok(TimedCadu { cadu, reception })
    }
}
