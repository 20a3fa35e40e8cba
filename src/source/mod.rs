pub mod file;
pub mod pcap;
pub mod tcp;
pub mod udp;

use crate::cadu::TimedCadu;
use crate::config::{IngestConfig, SourceKind};
use crate::metrics::IngestMetrics;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Failure to attach to the byte source. These are the only fatal errors in
/// the pipeline: once attached, data-level faults are counted, never raised.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("udp bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("multicast join {group}: {source}")]
    Join { group: IpAddr, source: io::Error },
    #[error("tcp listen {addr}: {source}")]
    Listen { addr: SocketAddr, source: io::Error },
    #[error("open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
}

/// A running producer: the bounded CADU queue plus the task driving it.
pub struct SpawnedSource {
    pub cadus: mpsc::Receiver<TimedCadu>,
    pub local_addr: Option<SocketAddr>,
    pub handle: JoinHandle<()>,
}

/// Attaches to the configured byte source and spawns the decode producer.
///
/// The producer feeds a FIFO of `queue_capacity` CADUs. Socket and file
/// producers block when the queue is full; TCP connection producers drop the
/// frame instead, preferring to keep draining the kernel socket under
/// overload. Binding and opening happen before this returns so attach
/// failures surface synchronously.
pub async fn spawn(
    config: &IngestConfig,
    metrics: Arc<IngestMetrics>,
    shutdown: watch::Receiver<bool>,
) -> Result<SpawnedSource, SourceError> {
    let (tx, rx) = mpsc::channel(config.queue_capacity);
    match &config.source {
        SourceKind::Udp(addr) => {
            let socket = udp::bind(*addr).await?;
            let local_addr = socket.local_addr().ok();
            let handle = tokio::spawn(udp::pump(socket, tx, metrics, shutdown));
            Ok(SpawnedSource { cadus: rx, local_addr, handle })
        }
        SourceKind::Tcp(addr) => {
            let listener = tcp::listen(*addr).await?;
            let local_addr = listener.local_addr().ok();
            let handle = tokio::spawn(tcp::accept_loop(listener, tx, metrics, shutdown));
            Ok(SpawnedSource { cadus: rx, local_addr, handle })
        }
        SourceKind::File { paths, hrdfe } => {
            let reader = file::open_chain(paths)?;
            let hrdfe = *hrdfe;
            let handle = tokio::task::spawn_blocking(move || {
                file::pump_blocking(reader, hrdfe, tx, metrics, shutdown)
            });
            Ok(SpawnedSource { cadus: rx, local_addr: None, handle })
        }
        SourceKind::Pcap { paths, transport } => {
            let files = pcap::open_all(paths)?;
            let transport = *transport;
            let handle = tokio::task::spawn_blocking(move || {
                pcap::pump_blocking(files, transport, tx, metrics, shutdown)
            });
            Ok(SpawnedSource { cadus: rx, local_addr: None, handle })
        }
    }
}
