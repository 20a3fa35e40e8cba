use crate::cadu::{CaduDecoder, DecodeError, TimedCadu, CADU_LEN};
use crate::metrics::IngestMetrics;
use crate::source::SourceError;
use log::{error, info, warn};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Opens every file up front and chains them into one continuous stream, so
/// a CADU may span a file boundary.
pub fn open_chain(paths: &[PathBuf]) -> Result<Box<dyn Read + Send>, SourceError> {
    let mut chained: Box<dyn Read + Send> = Box::new(io::empty());
    for path in paths {
        let file = File::open(path)
            .map_err(|source| SourceError::Open { path: path.clone(), source })?;
        chained = Box::new(chained.chain(file));
    }
    Ok(chained)
}

/// Decode loop on the blocking pool. The queue send blocks when full: file
/// replay has no reason to lose frames.
pub fn pump_blocking(
    reader: Box<dyn Read + Send>,
    hrdfe: bool,
    tx: mpsc::Sender<TimedCadu>,
    metrics: Arc<IngestMetrics>,
    shutdown: watch::Receiver<bool>,
) {
    let buffered = BufReader::with_capacity(1 << 20, reader);
    let mut decoder = if hrdfe {
        CaduDecoder::with_hrdfe(buffered)
    } else {
        CaduDecoder::new(buffered)
    };
    loop {
        if *shutdown.borrow() {
            break;
        }
        match decoder.next_timed() {
            Ok(timed) => {
                metrics.record_cadu(CADU_LEN, timed.cadu.error.is_some());
                if tx.blocking_send(timed).is_err() {
                    break;
                }
            }
            Err(DecodeError::Eof) => break,
            Err(DecodeError::Truncated(n)) => {
                warn!("ingest.event=truncated_tail bytes={n}");
                break;
            }
            Err(DecodeError::Io(err)) => {
                error!("ingest.event=read_error reason={err}");
                break;
            }
        }
    }
    info!("ingest.event=source_drained kind=file");
}
