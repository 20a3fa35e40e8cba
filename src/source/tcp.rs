use crate::cadu::{decode_cadu, TimedCadu, CADU_LEN};
use crate::metrics::IngestMetrics;
use crate::source::SourceError;
use chrono::Utc;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

pub async fn listen(addr: SocketAddr) -> Result<TcpListener, SourceError> {
    TcpListener::bind(addr).await.map_err(|source| SourceError::Listen { addr, source })
}

/// Accepts connections for as long as the pipeline runs; every connection is
/// its own continuous CADU stream feeding the shared queue.
pub async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<TimedCadu>,
    metrics: Arc<IngestMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("ingest.event=accepted peer={peer}");
                    tokio::spawn(pump_connection(
                        stream,
                        peer,
                        tx.clone(),
                        Arc::clone(&metrics),
                        shutdown.clone(),
                    ));
                }
                Err(err) => {
                    warn!("ingest.event=accept_error reason={err}");
                    break;
                }
            }
        }
    }
    info!("ingest.event=listener_stopped kind=tcp");
}

/// Frame loop for one connection. When the queue is full the frame is
/// dropped and counted: stalling here would back up into the kernel socket
/// and stall the sender, so losing CADUs under overload is the contract.
async fn pump_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<TimedCadu>,
    metrics: Arc<IngestMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; CADU_LEN];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = stream.read_exact(&mut buf) => {
                if result.is_err() {
                    break;
                }
                let reception = Utc::now();
                let Ok(cadu) = decode_cadu(&mut &buf[..]) else {
                    continue;
                };
                metrics.record_cadu(CADU_LEN, cadu.error.is_some());
                match tx.try_send(TimedCadu { cadu, reception }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => metrics.record_drop(),
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }
    }
    debug!("ingest.event=connection_closed peer={peer}");
}
