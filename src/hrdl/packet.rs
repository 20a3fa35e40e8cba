use crate::gps;
use crate::hrdl::{HRDL_LENGTH_OVERHEAD, HRDL_SYNC};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet truncated near {0}")]
    Truncated(&'static str),
    #[error("invalid sync word {0:08x}")]
    Syncword(u32),
}

/// Application-level checksum failure: the arithmetic octet sum over
/// `[8, len-4)` disagrees with the trailing little-endian word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid checksum: want {want:08x}, got {got:08x}")]
pub struct PacketChecksumMismatch {
    pub want: u32,
    pub got: u32,
}

/// Relation of the declared length field to the bytes actually on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthCheck {
    Exact,
    /// More bytes on the wire than declared (extra trailing bytes).
    Bigger,
    /// Fewer bytes on the wire than declared (packet truncated).
    Smaller,
}

/// Decoded HRDL/VMU packet header. All multi-octet fields except the sync
/// word are little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmuHeader {
    pub size: u32,
    pub channel: u8,
    pub source: u8,
    pub sequence: u32,
    pub coarse: u32,
    pub fine: u16,
    pub property: u8,
    pub stream: u16,
    pub counter: u32,
    pub acq_time: i64,
    pub aux_time: i64,
    pub origin: u8,
    pub upi: Option<String>,
}

impl VmuHeader {
    pub fn parse(slice: &[u8]) -> Result<Self, PacketError> {
        let mut reader = SliceReader::new(slice);
        let sync = u32::from_be_bytes(reader.read::<4>("sync")?);
        if sync != u32::from_be_bytes(HRDL_SYNC) {
            return Err(PacketError::Syncword(sync));
        }
        let size = u32::from_le_bytes(reader.read::<4>("size")?);
        let channel = reader.read::<1>("channel")?[0];
        let source = reader.read::<1>("source")?[0];
        reader.read::<2>("reserved")?;
        let sequence = u32::from_le_bytes(reader.read::<4>("sequence")?);
        let coarse = u32::from_le_bytes(reader.read::<4>("coarse")?);
        let fine = u16::from_le_bytes(reader.read::<2>("fine")?);
        reader.read::<2>("reserved")?;
        let property = reader.read::<1>("property")?[0];
        let stream = u16::from_le_bytes(reader.read::<2>("stream")?);
        let counter = u32::from_le_bytes(reader.read::<4>("counter")?);
        let acq_time = i64::from_le_bytes(reader.read::<8>("acq_time")?);
        let aux_time = i64::from_le_bytes(reader.read::<8>("aux_time")?);
        let origin = reader.read::<1>("origin")?[0];

        let upi = match property >> 4 {
            1 => Some(reader.read_upi()?),
            2 => {
                reader.read::<20>("upi_padding")?;
                Some(reader.read_upi()?)
            }
            _ => None,
        };

        Ok(Self {
            size,
            channel,
            source,
            sequence,
            coarse,
            fine,
            property,
            stream,
            counter,
            acq_time,
            aux_time,
            origin,
            upi,
        })
    }

    pub fn packet_type(&self) -> u8 {
        self.property >> 4
    }

    pub fn subtype(&self) -> u8 {
        self.property & 0x0F
    }

    /// VMU timestamp from the compound coarse/fine field (GPS clock).
    pub fn timestamp(&self) -> DateTime<Utc> {
        gps::gps_time6(self.coarse, self.fine)
    }

    pub fn acquisition(&self) -> DateTime<Utc> {
        gps::gps_nanos(self.acq_time)
    }

    pub fn auxiliary(&self) -> DateTime<Utc> {
        gps::gps_nanos(self.aux_time)
    }
}

/// Arithmetic sum of every octet in `[8, len-4)`, the checksum input region.
pub fn payload_checksum(slice: &[u8]) -> u32 {
    if slice.len() < HRDL_LENGTH_OVERHEAD {
        return 0;
    }
    slice[8..slice.len() - 4]
        .iter()
        .fold(0u32, |sum, &b| sum.wrapping_add(b as u32))
}

/// Compares the computed sum with the trailing little-endian checksum word.
pub fn verify_checksum(slice: &[u8]) -> Result<(), PacketChecksumMismatch> {
    if slice.len() < HRDL_LENGTH_OVERHEAD {
        return Err(PacketChecksumMismatch { want: 0, got: 0 });
    }
    let tail = &slice[slice.len() - 4..];
    let want = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let got = payload_checksum(slice);
    if want == got {
        Ok(())
    } else {
        Err(PacketChecksumMismatch { want, got })
    }
}

/// Classifies the declared size against the on-wire slice length.
pub fn length_check(declared: u32, on_wire: usize) -> LengthCheck {
    let payload = on_wire.saturating_sub(HRDL_LENGTH_OVERHEAD);
    match (declared as usize).cmp(&payload) {
        std::cmp::Ordering::Equal => LengthCheck::Exact,
        std::cmp::Ordering::Greater => LengthCheck::Smaller,
        std::cmp::Ordering::Less => LengthCheck::Bigger,
    }
}

struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read<const N: usize>(&mut self, label: &'static str) -> Result<[u8; N], PacketError> {
        if self.pos + N > self.buf.len() {
            return Err(PacketError::Truncated(label));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn read_upi(&mut self) -> Result<String, PacketError> {
        let raw = self.read::<32>("upi")?;
        let trimmed: Vec<u8> = raw.iter().copied().take_while(|&b| b != 0).collect();
        Ok(String::from_utf8_lossy(&trimmed).into_owned())
    }
}
