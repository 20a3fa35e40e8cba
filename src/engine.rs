use crate::cadu::{sequence_step, GapTracker, TimedCadu};
use crate::config::IngestConfig;
use crate::hrdl::accounting::{AccountSummary, Accountant};
use crate::hrdl::reassembler::{Reassembler, ReassemblerConfig};
use crate::metrics::IngestMetrics;
use crate::report::{self, HeaderDump};
use chrono::Duration;
use log::{info, warn};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Per-packet debug hooks for the `packets` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMode {
    Raw,
    Header,
}

impl FromStr for DebugMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(DebugMode::Raw),
            "header" => Ok(DebugMode::Header),
            other => Err(format!("unsupported debug hook `{other}` (expected raw or header)")),
        }
    }
}

/// Gaps-mode result: the stream totals plus the time spent inside gaps and
/// the wall-clock run time.
pub struct GapRun {
    pub tracker: GapTracker,
    pub in_gaps: Duration,
    pub wall: Duration,
}

/// Consumer side of the pipeline. Reads decoded CADUs off the bounded queue
/// until the source drains or a termination signal fires, then hands back
/// the accumulated accounting for the reporter.
pub struct Engine {
    metrics: Arc<IngestMetrics>,
}

impl Engine {
    pub fn new(metrics: Arc<IngestMetrics>) -> Self {
        Self { metrics }
    }

    /// One row per decoded CADU.
    pub async fn run_cadus(
        &self,
        mut cadus: mpsc::Receiver<TimedCadu>,
        mut shutdown: watch::Receiver<bool>,
    ) -> GapTracker {
        let mut tracker = GapTracker::new();
        let mut index = 0u64;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = cadus.recv() => match next {
                    Some(timed) => {
                        let (missing, elapsed, _) = tracker.observe(&timed);
                        index += 1;
                        report::print_cadu_row(index, &timed, missing, elapsed, tracker.elapsed());
                    }
                    None => break,
                }
            }
        }
        tracker
    }

    /// One row per sequence discontinuity.
    pub async fn run_gaps(
        &self,
        mut cadus: mpsc::Receiver<TimedCadu>,
        mut shutdown: watch::Receiver<bool>,
    ) -> GapRun {
        let started = std::time::Instant::now();
        let mut tracker = GapTracker::new();
        let mut in_gaps = Duration::zero();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = cadus.recv() => match next {
                    Some(timed) => {
                        let (_, _, record) = tracker.observe(&timed);
                        if let Some(gap) = record {
                            in_gaps += gap.elapsed;
                            report::print_gap_row(&gap);
                        }
                    }
                    None => break,
                }
            }
        }
        let wall = Duration::from_std(started.elapsed()).unwrap_or_else(|_| Duration::zero());
        GapRun { tracker, in_gaps, wall }
    }

    /// Full pipeline: reassemble HRDL packets and account them per key.
    pub async fn run_packets(
        &self,
        mut cadus: mpsc::Receiver<TimedCadu>,
        mut shutdown: watch::Receiver<bool>,
        config: &IngestConfig,
        debug: Option<DebugMode>,
    ) -> AccountSummary {
        let mut reassembler = Reassembler::new(ReassemblerConfig {
            gap_fill: config.gap_fill,
            max_pending: config.max_pending_bytes,
            ..Default::default()
        });
        let mut accountant = Accountant::new(config.selector);
        let mut dump = HeaderDump::new();
        let mut previous: Option<u32> = None;
        let mut index = 0u64;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = cadus.recv() => match next {
                    Some(timed) => {
                        let sequence = timed.cadu.sequence();
                        let step = previous.map(|p| sequence_step(sequence, p)).unwrap_or(1);
                        previous = Some(sequence);
                        for slice in reassembler.push(&timed.cadu.payload, step) {
                            index += 1;
                            self.account(&mut accountant, &mut dump, debug, index, &slice);
                        }
                    }
                    None => break,
                }
            }
        }
        if let Some(tail) = reassembler.finish() {
            index += 1;
            self.account(&mut accountant, &mut dump, debug, index, &tail);
        }
        info!(
            "ingest.event=stream_done packets={} runts={} forced_flushes={}",
            index,
            reassembler.runts(),
            reassembler.forced_flushes(),
        );
        accountant.into_summary()
    }

    fn account(
        &self,
        accountant: &mut Accountant,
        dump: &mut HeaderDump,
        debug: Option<DebugMode>,
        index: u64,
        slice: &[u8],
    ) {
        match accountant.record(slice) {
            Ok(Some(record)) => {
                self.metrics.record_packet(record.checksum_ok);
                match debug {
                    Some(DebugMode::Raw) => report::debug_raw(index, slice),
                    Some(DebugMode::Header) => dump.print(index, slice),
                    None => {}
                }
            }
            Ok(None) => {}
            Err(err) => warn!("ingest.event=slice_skipped reason={err}"),
        }
    }
}
