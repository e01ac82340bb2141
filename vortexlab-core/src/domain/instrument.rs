use serde::{Deserialize, Serialize};

/// Tick rounding policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TickPolicy {
    /// Round to nearest tick
    RoundNearest,
    /// Round down
    RoundDown,
    /// Round up
    RoundUp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionRight {
    Call,
    Put,
}

/// What backs an instrument identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentKind {
    /// Non-tradable reference series (e.g. NIFTY spot).
    Index,
    Equity,
    Option { right: OptionRight, strike: f64 },
    Future {
        #[serde(default)]
        expiry: Option<chrono::NaiveDate>,
    },
}

/// Instrument metadata for tick size, lot size, etc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub kind: InstrumentKind,
    pub tick_size: f64,
    pub lot_size: f64,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, kind: InstrumentKind, tick_size: f64, lot_size: f64) -> Self {
        Self { symbol: symbol.into(), kind, tick_size, lot_size }
    }

    pub fn index(symbol: impl Into<String>) -> Self {
        Self::new(symbol, InstrumentKind::Index, 0.05, 1.0)
    }

    pub fn option(symbol: impl Into<String>, right: OptionRight, strike: f64, lot_size: f64) -> Self {
        Self::new(symbol, InstrumentKind::Option { right, strike }, 0.05, lot_size)
    }

    pub fn future(symbol: impl Into<String>, tick_size: f64, lot_size: f64) -> Self {
        Self::new(symbol, InstrumentKind::Future { expiry: None }, tick_size, lot_size)
    }

    /// Round price according to policy
    pub fn round_price(&self, price: f64, policy: TickPolicy) -> f64 {
        if self.tick_size <= 0.0 {
            return price;
        }
        let ticks = price / self.tick_size;
        // Absorb float noise so 100.15 / 0.05 does not floor to 2002.
        let nudged = (ticks * 1e9).round() / 1e9;
        let rounded_ticks = match policy {
            TickPolicy::RoundNearest => nudged.round(),
            TickPolicy::RoundDown => nudged.floor(),
            TickPolicy::RoundUp => nudged.ceil(),
        };
        rounded_ticks * self.tick_size
    }

    pub fn strike(&self) -> Option<f64> {
        match self.kind {
            InstrumentKind::Option { strike, .. } => Some(strike),
            _ => None,
        }
    }
}
