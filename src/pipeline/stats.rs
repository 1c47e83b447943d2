// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 会话统计 (工作线程写, 命令线程读)

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct PipelineStats {
    frames_read: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    read_failures: AtomicU64,
    inference_failures: AtomicU64,
}

/// 统计快照
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_read: u64,
    pub frames_delivered: u64,
    /// 交付时被新帧替换, 或 close 时未被取走的帧
    pub frames_dropped: u64,
    pub read_failures: u64,
    pub inference_failures: u64,
}

impl PipelineStats {
    pub(crate) fn reset(&self) {
        for counter in [
            &self.frames_read,
            &self.frames_delivered,
            &self.frames_dropped,
            &self.read_failures,
            &self.inference_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn frame_read(&self) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frames_dropped(&self, n: u64) {
        self.frames_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn read_failed(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inference_failed(&self) {
        self.inference_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_reset() {
        let stats = PipelineStats::default();
        stats.frame_read();
        stats.frame_read();
        stats.frame_delivered();
        stats.frames_dropped(3);
        stats.inference_failed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_read, 2);
        assert_eq!(snapshot.frames_delivered, 1);
        assert_eq!(snapshot.frames_dropped, 3);
        assert_eq!(snapshot.inference_failures, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
