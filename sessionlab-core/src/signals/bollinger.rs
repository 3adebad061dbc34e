//! Bollinger band fade: a bar tags the band on the trade side, a later bar
//! closes back inside it, and the opposite band becomes the target.
//!
//! Long: `low <= lower`, then `close > lower`; target = upper band at
//! confirmation. Short mirrors it on the upper band.

use super::{BarWindow, DetectionContext, Signal, SignalModel};
use crate::domain::Direction;

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerDetector {
    pub length: usize,
    pub std_mult: f64,
}

impl SignalModel for BollingerDetector {
    fn name(&self) -> &str {
        "bollinger"
    }

    fn detect(
        &self,
        window: &BarWindow<'_>,
        ctx: &DetectionContext<'_>,
        direction: Direction,
    ) -> Option<Signal> {
        let bands = ctx.bands?;

        let (touch_idx, _) = window.find_from(window.range().start, |i, b| {
            bands.at(i).is_some_and(|(upper, lower)| match direction {
                Direction::Long => b.low <= lower,
                Direction::Short => b.high >= upper,
            })
        })?;

        let (confirm_idx, _) = window.find_from(touch_idx + 1, |i, b| {
            bands.at(i).is_some_and(|(upper, lower)| match direction {
                Direction::Long => b.close > lower,
                Direction::Short => b.close < upper,
            })
        })?;

        let (upper, lower) = bands.at(confirm_idx)?;
        let target = match direction {
            Direction::Long => upper,
            Direction::Short => lower,
        };
        window.signal(direction, touch_idx, confirm_idx, Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::BandSeries;
    use crate::session::SessionRef;
    use crate::signals::bars_from;

    fn setup() -> Vec<crate::domain::Bar> {
        bars_from(&[
            (1.1000, 1.1002, 1.0998, 1.1000),
            (1.1000, 1.1005, 1.0999, 1.1004),
            (1.1004, 1.1004, 1.1000, 1.1000), // stays above lower band
            (1.1000, 1.1001, 1.0960, 1.0965), // tags lower band
            (1.0965, 1.0999, 1.0964, 1.0995), // closes back inside
            (1.0995, 1.1010, 1.0994, 1.1008),
        ])
    }

    #[test]
    fn long_touch_and_close_inside() {
        let bars = setup();
        let bands = BandSeries::compute(&bars, 0..bars.len(), 3, 1.0);
        let r = SessionRef { ref_high: 1.1, ref_low: 1.1, start: bars[0].time, end: bars[5].time };
        let ctx = DetectionContext {
            session_ref: &r,
            pip_size: 0.0001,
            entry_start: bars[0].time,
            adr: None,
            bands: Some(&bands),
        };
        let w = BarWindow::new(&bars, 0..bars.len());
        let d = BollingerDetector { length: 3, std_mult: 1.0 };
        let sig = d.detect(&w, &ctx, Direction::Long).unwrap();
        assert_eq!(sig.sweep_time, bars[3].time);
        assert_eq!(sig.confirm_index, 4);
        let (upper, _) = bands.at(4).unwrap();
        assert_eq!(sig.target_price, Some(upper));
        assert!(upper > bars[4].close);
    }

    #[test]
    fn no_bands_no_signal() {
        let bars = setup();
        let r = SessionRef { ref_high: 1.1, ref_low: 1.1, start: bars[0].time, end: bars[5].time };
        let ctx = DetectionContext {
            session_ref: &r,
            pip_size: 0.0001,
            entry_start: bars[0].time,
            adr: None,
            bands: None,
        };
        let w = BarWindow::new(&bars, 0..bars.len());
        let d = BollingerDetector { length: 3, std_mult: 1.0 };
        assert!(d.detect(&w, &ctx, Direction::Long).is_none());
    }
}
