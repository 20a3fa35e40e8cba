use crate::cadu::TimedCadu;
use chrono::{DateTime, Duration, Utc};

/// One detected discontinuity between two consecutive arrivals.
#[derive(Debug, Clone)]
pub struct GapRecord {
    pub previous_reception: DateTime<Utc>,
    pub reception: DateTime<Utc>,
    pub previous_sequence: u32,
    pub sequence: u32,
    pub missing: u32,
    pub elapsed: Duration,
}

/// Running sequence-continuity accounting over the CADU stream. Keeps the
/// last arrival and the stream totals; emits a [`GapRecord`] whenever the
/// virtual-channel counter jumps.
#[derive(Debug, Default)]
pub struct GapTracker {
    previous: Option<(u32, DateTime<Utc>)>,
    count: u64,
    missing: u64,
    corrupted: u64,
    elapsed: Duration,
}

impl GapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts one arrival. Returns the pairwise missing count, the elapsed
    /// reception time against the previous arrival, and a gap record when the
    /// missing count is non-zero.
    pub fn observe(&mut self, cadu: &TimedCadu) -> (u32, Duration, Option<GapRecord>) {
        let (missing, elapsed, record) = match self.previous {
            Some((prev_seq, prev_when)) => {
                let missing = crate::cadu::sequence_gap(cadu.cadu.sequence(), prev_seq);
                let elapsed = (cadu.reception - prev_when).abs();
                let record = (missing != 0).then(|| GapRecord {
                    previous_reception: prev_when,
                    reception: cadu.reception,
                    previous_sequence: prev_seq,
                    sequence: cadu.cadu.sequence(),
                    missing,
                    elapsed,
                });
                (missing, elapsed, record)
            }
            None => (0, Duration::zero(), None),
        };

        self.count += 1;
        self.missing += missing as u64;
        self.elapsed += elapsed;
        if cadu.cadu.error.is_some() {
            self.corrupted += 1;
        }
        self.previous = Some((cadu.cadu.sequence(), cadu.reception));
        (missing, elapsed, record)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn missing(&self) -> u64 {
        self.missing
    }

    pub fn corrupted(&self) -> u64 {
        self.corrupted
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
