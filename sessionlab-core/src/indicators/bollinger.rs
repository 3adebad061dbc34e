//! Bollinger Bands: moving average +/- standard deviation multiplier.
//!
//! - Middle: SMA(close, period)
//! - Upper: middle + mult * stddev(close, period)
//! - Lower: middle - mult * stddev(close, period)
//!
//! Uses population stddev (divide by N).
//! Lookback: period - 1.

use std::ops::Range;

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BollingerBand {
    Upper,
    Middle,
    Lower,
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    multiplier: f64,
    band: BollingerBand,
    name: String,
}

impl Bollinger {
    pub fn new(band: BollingerBand, period: usize, multiplier: f64) -> Self {
        let period = period.max(1);
        let label = match band {
            BollingerBand::Upper => "upper",
            BollingerBand::Middle => "middle",
            BollingerBand::Lower => "lower",
        };
        Self {
            period,
            multiplier,
            band,
            name: format!("bollinger_{label}_{period}_{multiplier}"),
        }
    }

    pub fn upper(period: usize, multiplier: f64) -> Self {
        Self::new(BollingerBand::Upper, period, multiplier)
    }

    pub fn middle(period: usize, multiplier: f64) -> Self {
        Self::new(BollingerBand::Middle, period, multiplier)
    }

    pub fn lower(period: usize, multiplier: f64) -> Self {
        Self::new(BollingerBand::Lower, period, multiplier)
    }
}

impl Indicator for Bollinger {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let n = bars.len();
        let mut result = vec![f64::NAN; n];

        if n < self.period {
            return result;
        }

        for i in (self.period - 1)..n {
            let window = &bars[i + 1 - self.period..=i];
            if window.iter().any(|b| b.close.is_nan()) {
                continue;
            }

            let mean = window.iter().map(|b| b.close).sum::<f64>() / self.period as f64;
            if self.band == BollingerBand::Middle {
                result[i] = mean;
                continue;
            }

            let variance = window
                .iter()
                .map(|b| {
                    let diff = b.close - mean;
                    diff * diff
                })
                .sum::<f64>()
                / self.period as f64;
            let width = self.multiplier * variance.sqrt();

            result[i] = match self.band {
                BollingerBand::Upper => mean + width,
                _ => mean - width,
            };
        }

        result
    }
}

/// Upper/middle/lower bands over one slice of a larger series.
///
/// Values are stored relative to `offset`, the absolute index of the first
/// bar the bands were computed over, so lookups take series indices.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSeries {
    offset: usize,
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

impl BandSeries {
    /// Compute bands over `bars[range]`.
    pub fn compute(bars: &[Bar], range: Range<usize>, period: usize, multiplier: f64) -> Self {
        let slice = &bars[range.clone()];
        Self {
            offset: range.start,
            upper: Bollinger::upper(period, multiplier).compute(slice),
            middle: Bollinger::middle(period, multiplier).compute(slice),
            lower: Bollinger::lower(period, multiplier).compute(slice),
        }
    }

    /// Absolute index range the bands cover.
    pub fn span(&self) -> Range<usize> {
        self.offset..self.offset + self.upper.len()
    }

    /// `(upper, lower)` at absolute bar index, or `None` during warmup or
    /// outside the computed span.
    pub fn at(&self, index: usize) -> Option<(f64, f64)> {
        let i = index.checked_sub(self.offset)?;
        let upper = *self.upper.get(i)?;
        let lower = *self.lower.get(i)?;
        if upper.is_nan() || lower.is_nan() {
            None
        } else {
            Some((upper, lower))
        }
    }
}
