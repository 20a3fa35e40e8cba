use crate::cadu::{decode_cadu, TimedCadu, CADU_LEN};
use crate::metrics::IngestMetrics;
use crate::source::SourceError;
use chrono::Utc;
use log::{info, trace, warn};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

/// Binds the datagram socket, joining the group on the default interface
/// when the address is multicast.
pub async fn bind(addr: SocketAddr) -> Result<UdpSocket, SourceError> {
    if addr.ip().is_multicast() {
        let wildcard: SocketAddr = match addr.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, addr.port()).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, addr.port()).into(),
        };
        let socket = UdpSocket::bind(wildcard)
            .await
            .map_err(|source| SourceError::Bind { addr: wildcard, source })?;
        match addr.ip() {
            IpAddr::V4(group) => socket
                .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
                .map_err(|source| SourceError::Join { group: addr.ip(), source })?,
            IpAddr::V6(group) => socket
                .join_multicast_v6(&group, 0)
                .map_err(|source| SourceError::Join { group: addr.ip(), source })?,
        }
        Ok(socket)
    } else {
        UdpSocket::bind(addr).await.map_err(|source| SourceError::Bind { addr, source })
    }
}

/// Receives one CADU per datagram. The queue send awaits capacity: under
/// overload this producer stalls rather than losing frames it already read.
pub async fn pump(
    socket: UdpSocket,
    tx: mpsc::Sender<TimedCadu>,
    metrics: Arc<IngestMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, peer)) => {
                    if len < CADU_LEN {
                        warn!("ingest.event=runt_datagram bytes={len} peer={peer}");
                        continue;
                    }
                    let reception = Utc::now();
                    let Ok(cadu) = decode_cadu(&mut &buf[..CADU_LEN]) else {
                        continue;
                    };
                    metrics.record_cadu(CADU_LEN, cadu.error.is_some());
                    trace!("ingest.event=cadu kind=udp seq={} peer={peer}", cadu.header.sequence);
                    if tx.send(TimedCadu { cadu, reception }).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("ingest.event=recv_error kind=udp reason={err}");
                    break;
                }
            }
        }
    }
    info!("ingest.event=listener_stopped kind=udp");
}
