use crate::hrdl::accounting::Selector;
use crate::hrdl::reassembler::DEFAULT_MAX_PENDING;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Bounded FIFO between the decode producer and the reassembly consumer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Transport header length inside pcap records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcapTransport {
    Udp,
    Tcp,
}

impl PcapTransport {
    pub fn header_len(self) -> usize {
        match self {
            PcapTransport::Udp => 8,
            PcapTransport::Tcp => 32,
        }
    }
}

/// Where the octet stream comes from.
#[derive(Debug, Clone)]
pub enum SourceKind {
    /// Unicast or multicast datagrams, one CADU per datagram.
    Udp(SocketAddr),
    /// Listener; every accepted connection is a continuous CADU stream.
    Tcp(SocketAddr),
    /// One or more files read back to back, optionally HRDFE-prefixed.
    File { paths: Vec<PathBuf>, hrdfe: bool },
    /// Packet captures of the downlink transport.
    Pcap { paths: Vec<PathBuf>, transport: PcapTransport },
}

impl SourceKind {
    pub fn describe(&self) -> String {
        match self {
            SourceKind::Udp(addr) => format!("udp {addr}"),
            SourceKind::Tcp(addr) => format!("tcp {addr}"),
            SourceKind::File { paths, hrdfe } => {
                format!("file x{}{}", paths.len(), if *hrdfe { " (hrdfe)" } else { "" })
            }
            SourceKind::Pcap { paths, transport } => {
                format!("pcap+{} x{}", match transport {
                    PcapTransport::Udp => "udp",
                    PcapTransport::Tcp => "tcp",
                }, paths.len())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub source: SourceKind,
    pub selector: Selector,
    pub queue_capacity: usize,
    pub max_pending_bytes: usize,
    /// Zero-fill reassembly gaps instead of resynchronising on the next sync
    /// word.
    pub gap_fill: bool,
}

impl IngestConfig {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            selector: Selector::Channel,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_pending_bytes: DEFAULT_MAX_PENDING,
            gap_fill: false,
        }
    }
}
