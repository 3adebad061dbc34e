//! ADR pullback: price pulls back a fraction of the average daily range
//! against the bias, then closes back through the day's open.
//!
//! The reference is anchored: `ref_high == ref_low == day_open`. The window
//! normally starts at local midnight so the pullback may form before the
//! entry session; only the reclaim must land inside it.

use super::{BarWindow, DetectionContext, Signal, SignalModel};
use crate::domain::Direction;

#[derive(Debug, Clone, PartialEq)]
pub struct AdrPullbackDetector {
    pub lookback_days: usize,
    /// Pullback depth as a fraction of ADR.
    pub pullback_pct: f64,
}

impl AdrPullbackDetector {
    /// Price level the pullback must reach.
    pub fn pullback_level(&self, day_open: f64, adr: f64, direction: Direction) -> f64 {
        day_open - direction.sign() * adr * self.pullback_pct
    }
}

impl SignalModel for AdrPullbackDetector {
    fn name(&self) -> &str {
        "adr_pullback"
    }

    fn detect(
        &self,
        window: &BarWindow<'_>,
        ctx: &DetectionContext<'_>,
        direction: Direction,
    ) -> Option<Signal> {
        let adr = ctx.adr?;
        if adr <= 0.0 {
            return None;
        }
        let day_open = ctx.session_ref.ref_high;
        let level = self.pullback_level(day_open, adr, direction);

        let (pullback_idx, _) = window.find_from(window.range().start, |_, b| match direction {
            Direction::Long => b.low <= level,
            Direction::Short => b.high >= level,
        })?;

        let (confirm_idx, _) = window.find_from(pullback_idx + 1, |_, b| {
            b.time >= ctx.entry_start
                && match direction {
                    Direction::Long => b.close >= day_open,
                    Direction::Short => b.close <= day_open,
                }
        })?;

        window.signal(direction, pullback_idx, confirm_idx, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRef;
    use crate::signals::bars_from;
    use chrono::{Duration, TimeZone, Utc};

    fn detector() -> AdrPullbackDetector {
        AdrPullbackDetector {
            lookback_days: 20,
            pullback_pct: 0.35,
        }
    }

    fn anchored(day_open: f64) -> SessionRef {
        let t = Utc.with_ymd_and_hms(2025, 1, 2, 5, 0, 0).unwrap();
        SessionRef { ref_high: day_open, ref_low: day_open, start: t, end: t }
    }

    #[test]
    fn long_pullback_then_reclaim() {
        // ADR 60 pips, 35% => level 1.1000 - 0.0021 = 1.0979
        let bars = bars_from(&[
            (1.1000, 1.1002, 1.0990, 1.0992),
            (1.0992, 1.0993, 1.0978, 1.0980), // pullback
            (1.0980, 1.0995, 1.0979, 1.0994),
            (1.0994, 1.1006, 1.0993, 1.1004), // reclaim
        ]);
        let r = anchored(1.1000);
        let ctx = DetectionContext {
            session_ref: &r,
            pip_size: 0.0001,
            entry_start: bars[0].time,
            adr: Some(0.0060),
            bands: None,
        };
        let w = BarWindow::new(&bars, 0..bars.len());
        let sig = detector().detect(&w, &ctx, Direction::Long).unwrap();
        assert_eq!(sig.confirm_index, 3);
        assert_eq!(sig.sweep_time, bars[1].time);
        assert_eq!(sig.sweep_low, 1.0978);
        assert_eq!(sig.sweep_high, 1.1006);
    }

    #[test]
    fn reclaim_before_entry_start_is_ignored() {
        let bars = bars_from(&[
            (1.1000, 1.1023, 1.0999, 1.1020), // pullback for short (>= 1.1021)
            (1.1020, 1.1021, 1.0995, 1.0998), // reclaim, but before entry start
            (1.0998, 1.1003, 1.0997, 1.1002),
            (1.1002, 1.1003, 1.0990, 1.0996), // reclaim inside the window
        ]);
        let r = anchored(1.1000);
        let ctx = DetectionContext {
            session_ref: &r,
            pip_size: 0.0001,
            entry_start: bars[0].time + Duration::minutes(10),
            adr: Some(0.0060),
            bands: None,
        };
        let w = BarWindow::new(&bars, 0..bars.len());
        let sig = detector().detect(&w, &ctx, Direction::Short).unwrap();
        assert_eq!(sig.confirm_index, 3);
    }

    #[test]
    fn missing_or_non_positive_adr_gives_nothing() {
        let bars = bars_from(&[(1.1, 1.2, 1.0, 1.1); 3]);
        let r = anchored(1.1);
        let w = BarWindow::new(&bars, 0..bars.len());
        for adr in [None, Some(0.0), Some(-1.0)] {
            let ctx = DetectionContext {
                session_ref: &r,
                pip_size: 0.0001,
                entry_start: bars[0].time,
                adr,
                bands: None,
            };
            assert!(detector().detect(&w, &ctx, Direction::Long).is_none());
        }
    }

    #[test]
    fn pullback_level_direction() {
        let d = detector();
        assert!((d.pullback_level(1.0, 0.01, Direction::Long) - 0.9965).abs() < 1e-12);
        assert!((d.pullback_level(1.0, 0.01, Direction::Short) - 1.0035).abs() < 1e-12);
    }
}
