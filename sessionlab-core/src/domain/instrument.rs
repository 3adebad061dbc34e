use serde::{Deserialize, Serialize};

/// Pip size for a currency pair: 0.01 for yen crosses, 0.0001 otherwise.
pub fn pip_size(symbol: &str) -> f64 {
    if symbol.contains("JPY") {
        0.01
    } else {
        0.0001
    }
}

/// Instrument metadata: symbol, pip size and quoted spread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub pip_size: f64,
    pub spread_pips: f64,
}

impl Instrument {
    /// Create a forex instrument, deriving the pip size from the symbol.
    pub fn forex(symbol: impl Into<String>, spread_pips: f64) -> Self {
        let symbol = symbol.into();
        let pip_size = pip_size(&symbol);
        Self {
            symbol,
            pip_size,
            spread_pips,
        }
    }

    /// Convert a pip distance into a price distance.
    pub fn pips_to_price(&self, pips: f64) -> f64 {
        pips * self.pip_size
    }

    /// Convert a price distance into pips.
    pub fn price_to_pips(&self, distance: f64) -> f64 {
        distance / self.pip_size
    }
}
