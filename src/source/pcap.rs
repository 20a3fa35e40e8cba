use crate::cadu::{decode_cadu, TimedCadu, CADU_LEN};
use crate::config::PcapTransport;
use crate::metrics::IngestMetrics;
use crate::source::SourceError;
use chrono::{TimeZone, Utc};
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub const GLOBAL_HEADER_LEN: usize = 24;
pub const RECORD_HEADER_LEN: usize = 16;
pub const COOKED_HEADER_LEN: usize = 14;
pub const IP_HEADER_LEN: usize = 20;

pub fn open_all(paths: &[PathBuf]) -> Result<Vec<(PathBuf, File)>, SourceError> {
    paths
        .iter()
        .map(|path| {
            File::open(path)
                .map(|file| (path.clone(), file))
                .map_err(|source| SourceError::Open { path: path.clone(), source })
        })
        .collect()
}

/// Walks capture records, skipping the link/ip/transport encapsulation in
/// front of each CADU. The record timestamp becomes the reception time.
pub fn pump_blocking(
    files: Vec<(PathBuf, File)>,
    transport: PcapTransport,
    tx: mpsc::Sender<TimedCadu>,
    metrics: Arc<IngestMetrics>,
    shutdown: watch::Receiver<bool>,
) {
    'files: for (path, file) in files {
        let mut reader = BufReader::with_capacity(1 << 20, file);
        let mut global = [0u8; GLOBAL_HEADER_LEN];
        if reader.read_exact(&mut global).is_err() {
            warn!("ingest.event=capture_too_short path={}", path.display());
            continue;
        }
        loop {
            if *shutdown.borrow() {
                break 'files;
            }
            let mut record = [0u8; RECORD_HEADER_LEN];
            if reader.read_exact(&mut record).is_err() {
                break;
            }
            let sec = u32::from_le_bytes(record[0..4].try_into().unwrap());
            let usec = u32::from_le_bytes(record[4..8].try_into().unwrap());
            let captured = u32::from_le_bytes(record[8..12].try_into().unwrap()) as usize;
            if captured == 0 {
                break;
            }
            if captured < CADU_LEN + transport.header_len() {
                if discard(&mut reader, captured).is_err() {
                    break;
                }
                continue;
            }
            let skip = COOKED_HEADER_LEN + IP_HEADER_LEN + transport.header_len();
            if discard(&mut reader, skip).is_err() {
                break;
            }
            let cadu = match decode_cadu(&mut reader) {
                Ok(cadu) => cadu,
                Err(_) => break,
            };
            metrics.record_cadu(CADU_LEN, cadu.error.is_some());
            let reception = Utc
                .timestamp_opt(sec as i64, usec.saturating_mul(1000))
                .single()
                .unwrap_or_else(Utc::now);
            if tx.blocking_send(TimedCadu { cadu, reception }).is_err() {
                break 'files;
            }
            // Captures may carry trailing bytes beyond the frame.
            let residue = captured.saturating_sub(skip + CADU_LEN);
            if residue > 0 && discard(&mut reader, residue).is_err() {
                break;
            }
        }
    }
    info!("ingest.event=source_drained kind=pcap");
}

fn discard<R: Read>(reader: &mut R, n: usize) -> io::Result<()> {
    let copied = io::copy(&mut reader.take(n as u64), &mut io::sink())?;
    if copied as usize == n {
        Ok(())
    } else {
        Err(io::ErrorKind::UnexpectedEof.into())
    }
}
