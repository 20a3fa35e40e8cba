pub mod accounting;
pub mod packet;
pub mod reassembler;

pub use accounting::{Accountant, PacketStatus, Selector, SequenceReport};
pub use packet::{LengthCheck, VmuHeader};
pub use reassembler::{Reassembler, ReassemblerConfig};

use thiserror::Error;

/// Sync word opening every HRDL packet (big-endian on the wire).
pub const HRDL_SYNC: [u8; 4] = [0xF8, 0x2E, 0x35, 0x53];
/// Escape sequence substituted by the downlink for a literal `F8 2E 35` in
/// packet bodies, so the sync pattern cannot occur outside packet boundaries.
pub const HRDL_STUFF: [u8; 4] = [0xF8, 0x2E, 0x35, 0xAA];
/// Declared size excludes sync, size word and trailing checksum.
pub const HRDL_LENGTH_OVERHEAD: usize = 12;
/// Fixed header through the origin octet; the optional UPI string follows.
pub const HRDL_HEADER_LEN: usize = 48;

/// Inconsistencies in slices handed to the accounting stage. Both indicate a
/// reassembly defect upstream; the slice is skipped and the stream continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("missing syncword")]
    MissingSyncword,
    #[error("multiple syncword")]
    MultipleSyncword,
}

/// First occurrence of the HRDL sync word in `hay`.
pub fn find_sync(hay: &[u8]) -> Option<usize> {
    hay.windows(HRDL_SYNC.len()).position(|w| w == HRDL_SYNC)
}
