use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared ingest counters, updated by producer tasks and the consumer loop.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    cadus_total: AtomicU64,
    cadus_corrupted: AtomicU64,
    cadus_dropped: AtomicU64,
    bytes_total: AtomicU64,
    packets_total: AtomicU64,
    packets_bad: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub cadus_total: u64,
    pub cadus_corrupted: u64,
    pub cadus_dropped: u64,
    pub bytes_total: u64,
    pub packets_total: u64,
    pub packets_bad: u64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cadu(&self, bytes: usize, corrupted: bool) {
        self.cadus_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_total.fetch_add(bytes as u64, Ordering::Relaxed);
        if corrupted {
            self.cadus_corrupted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A frame discarded because the queue was full (TCP overload policy).
    pub fn record_drop(&self) {
        self.cadus_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet(&self, checksum_ok: bool) {
        self.packets_total.fetch_add(1, Ordering::Relaxed);
        if !checksum_ok {
            self.packets_bad.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.cadus_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cadus_total: self.cadus_total.load(Ordering::Relaxed),
            cadus_corrupted: self.cadus_corrupted.load(Ordering::Relaxed),
            cadus_dropped: self.cadus_dropped.load(Ordering::Relaxed),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            packets_total: self.packets_total.load(Ordering::Relaxed),
            packets_bad: self.packets_bad.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = IngestMetrics::new();
        metrics.record_cadu(1024, false);
        metrics.record_cadu(1024, true);
        metrics.record_drop();
        metrics.record_packet(true);
        metrics.record_packet(false);
        let snap = metrics.snapshot();
        assert_eq!(snap.cadus_total, 2);
        assert_eq!(snap.cadus_corrupted, 1);
        assert_eq!(snap.cadus_dropped, 1);
        assert_eq!(snap.bytes_total, 2048);
        assert_eq!(snap.packets_total, 2);
        assert_eq!(snap.packets_bad, 1);
    }
}
