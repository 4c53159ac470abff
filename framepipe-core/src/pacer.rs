//! Frame pacing: maps render ticks onto output frame slots.
//!
//! Frame `n` of the output is due at `t0 + (n - 0.5) / rate`. On every
//! tick the pacer compares the tick time against that slot and decides
//! how many copies of the current image the encoder should receive.

use tracing::warn;

/// Cumulative drop count at which the one-time warning fires.
pub const DEFAULT_DROP_WARNING_THRESHOLD: u64 = 10;

/// Outcome of one [`FramePacer::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceDecision {
    /// Ahead of schedule; submit nothing.
    Heartbeat,
    /// Submit the current image `copies` times (1 or 2).
    Capture { copies: u32 },
    /// Far behind schedule: submit once and skip `skipped` slots.
    Lagging { skipped: u64 },
}

impl PaceDecision {
    /// Number of readbacks to issue for this tick.
    pub fn frames(&self) -> u32 {
        match self {
            Self::Heartbeat => 0,
            Self::Capture { copies } => *copies,
            Self::Lagging { .. } => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FramePacer {
    frame_rate: f64,
    start: Option<f64>,
    frame_count: u64,
    drops: u64,
    warning_threshold: u64,
}

impl FramePacer {
    pub fn new(frame_rate: f64) -> Self {
        Self {
            frame_rate,
            start: None,
            frame_count: 0,
            drops: 0,
            warning_threshold: DEFAULT_DROP_WARNING_THRESHOLD,
        }
    }

    pub fn with_warning_threshold(mut self, threshold: u64) -> Self {
        self.warning_threshold = threshold;
        self
    }

    /// Reset for a new session starting at `t0`.
    pub fn restart(&mut self, t0: f64) {
        self.start = Some(t0);
        self.frame_count = 0;
        self.drops = 0;
    }

    /// Forget the start time; the next tick becomes `t0`.
    pub fn reset(&mut self) {
        self.start = None;
        self.frame_count = 0;
        self.drops = 0;
    }

    pub fn tick(&mut self, now: f64) -> PaceDecision {
        let t0 = *self.start.get_or_insert(now);
        let delta = 1.0 / self.frame_rate;
        let expected = t0 + (self.frame_count as f64 - 0.5) * delta;
        let gap = now - expected;

        if gap < 0.0 {
            PaceDecision::Heartbeat
        } else if gap < delta {
            self.frame_count += 1;
            PaceDecision::Capture { copies: 1 }
        } else if gap < 2.0 * delta {
            self.frame_count += 2;
            PaceDecision::Capture { copies: 2 }
        } else {
            self.drops += 1;
            if self.drops == self.warning_threshold {
                warn!(
                    "significant frame dropping detected; \
                     the renderer is too slow for {} fps",
                    self.frame_rate
                );
            }
            let skipped = (gap * self.frame_rate).floor() as u64;
            self.frame_count += skipped;
            PaceDecision::Lagging { skipped }
        }
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn drop_count(&self) -> u64 {
        self.drops
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_sets_start_and_emits_one_frame() {
        let mut p = FramePacer::new(60.0);
        assert_eq!(p.tick(5.0), PaceDecision::Capture { copies: 1 });
        assert_eq!(p.start_time(), Some(5.0));
        assert_eq!(p.frame_count(), 1);
    }

    #[test]
    fn steady_ticks_emit_one_frame_each() {
        let mut p = FramePacer::new(60.0);
        p.restart(0.0);
        for k in 0..120u64 {
            let d = p.tick(k as f64 / 60.0);
            assert_eq!(d, PaceDecision::Capture { copies: 1 }, "tick {k}");
        }
        assert_eq!(p.frame_count(), 120);
        assert_eq!(p.drop_count(), 0);
    }

    #[test]
    fn early_tick_is_heartbeat() {
        let mut p = FramePacer::new(60.0);
        p.restart(0.0);
        p.tick(0.0);
        // Next slot is due at 0.5 / 60.
        assert_eq!(p.tick(0.2 / 60.0), PaceDecision::Heartbeat);
        assert_eq!(p.frame_count(), 1);
    }

    #[test]
    fn late_by_one_slot_duplicates() {
        let mut p = FramePacer::new(60.0);
        p.restart(0.0);
        // expected(0) = -0.5/60, gap = 1.5/60.
        assert_eq!(p.tick(1.0 / 60.0), PaceDecision::Capture { copies: 2 });
        assert_eq!(p.frame_count(), 2);
    }

    #[test]
    fn large_lag_fast_forwards() {
        let mut p = FramePacer::new(30.0);
        p.restart(0.0);
        // gap = 1.0 + 0.5/30, floor(gap * 30) = 30.
        let d = p.tick(1.0);
        assert_eq!(d, PaceDecision::Lagging { skipped: 30 });
        assert_eq!(d.frames(), 1);
        assert_eq!(p.frame_count(), 30);
        assert_eq!(p.drop_count(), 1);
    }

    #[test]
    fn drop_count_is_cumulative_and_survives_recovery() {
        let mut p = FramePacer::new(10.0);
        p.restart(0.0);
        let mut now = 0.0;
        for _ in 0..12 {
            now += 1.0;
            assert!(matches!(p.tick(now), PaceDecision::Lagging { .. }));
        }
        assert_eq!(p.drop_count(), 12);
        p.restart(now);
        assert_eq!(p.drop_count(), 0);
        assert_eq!(p.frame_count(), 0);
    }

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct Logs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Logs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Logs {
        fn count(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .matches(needle)
                .count()
        }
    }

    #[test]
    fn drop_warning_fires_once_on_tenth_lag() {
        const WARNING: &str = "significant frame dropping";
        let logs = Logs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut p = FramePacer::new(30.0);
            p.restart(0.0);
            let mut now = 0.0;
            for tick in 1..=25u64 {
                now += 1.0;
                assert!(matches!(p.tick(now), PaceDecision::Lagging { .. }));
                let expected = usize::from(tick >= 10);
                assert_eq!(logs.count(WARNING), expected, "after lagging tick {tick}");
            }
            assert_eq!(p.drop_count(), 25);
        });
    }

    #[test]
    fn reset_takes_start_from_next_tick() {
        let mut p = FramePacer::new(25.0);
        p.restart(0.0);
        p.tick(3.0);
        p.reset();
        assert_eq!(p.start_time(), None);
        assert_eq!(p.tick(7.0), PaceDecision::Capture { copies: 1 });
        assert_eq!(p.start_time(), Some(7.0));
    }

    #[test]
    fn decision_frame_counts() {
        assert_eq!(PaceDecision::Heartbeat.frames(), 0);
        assert_eq!(PaceDecision::Capture { copies: 2 }.frames(), 2);
        assert_eq!(PaceDecision::Lagging { skipped: 40 }.frames(), 1);
    }
}
