//! Indicators used by the entry models.
//!
//! Bar-level indicators implement [`Indicator`] and are computed once over a
//! bar slice before detection runs. Day-level statistics (daily ranges, ADR)
//! live in [`daily_range`].

pub mod bollinger;
pub mod daily_range;

pub use bollinger::{BandSeries, Bollinger, BollingerBand};
pub use daily_range::{DailyRanges, DayRange};

use crate::domain::Bar;

/// Trait for bar-level indicators.
///
/// Indicators take a bar slice and produce a numeric output series of the
/// same length. The first `lookback()` values are `f64::NAN` (warmup).
///
/// No value at bar t may depend on price data from bar t+1 or later.
pub trait Indicator: Send + Sync {
    /// Human-readable name (e.g., "bollinger_upper_20_2").
    fn name(&self) -> &str;

    /// Number of bars needed before the indicator produces valid output.
    fn lookback(&self) -> usize;

    /// Compute the indicator for the entire slice.
    fn compute(&self, bars: &[Bar]) -> Vec<f64>;
}

/// Synthetic 5-minute bars from close prices, for tests.
///
/// open = previous close (or close for the first bar),
/// high/low = max/min(open, close) ± 0.0005.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    use chrono::{Duration, TimeZone, Utc};
    let t0 = Utc.with_ymd_and_hms(2025, 1, 2, 8, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                time: t0 + Duration::minutes(5 * i as i64),
                open,
                high: open.max(close) + 0.0005,
                low: open.min(close) - 0.0005,
                close,
            }
        })
        .collect()
}

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
