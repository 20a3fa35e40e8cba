pub mod cadu;
pub mod config;
pub mod crc;
pub mod engine;
pub mod fixtures;
pub mod gps;
pub mod hrdl;
pub mod metrics;
pub mod report;
pub mod source;

pub use cadu::{Cadu, CaduHeader, ChecksumMismatch, TimedCadu};
pub use config::{IngestConfig, PcapTransport, SourceKind};
pub use hrdl::{accounting::Selector, reassembler::Reassembler};
pub use metrics::IngestMetrics;
pub use source::SourceError;
