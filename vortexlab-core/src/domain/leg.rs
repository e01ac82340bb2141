//! Asset-aware leg mapping.
//!
//! A directional intent resolves onto one concrete leg:
//! - Increase exposure: long CALL option, or long FUTURE
//! - Decrease exposure: long PUT option, or short FUTURE
//!
//! Option legs always buy premium, so their direction sign is +1 regardless of
//! which way they bet on the underlying. Position math only ever sees the
//! [`LegCapability`] surface.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::instrument::{Instrument, InstrumentKind, OptionRight, TickPolicy};

/// Direction of exposure to the underlying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Exposure {
    Increase,
    Decrease,
}

/// Concrete shape backing a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegVariant {
    OptionLeg { right: OptionRight },
    FutureLeg { short: bool },
}

/// Shared capability set used by stop, target and PnL math.
pub trait LegCapability {
    /// +1 when the position profits from a rising leg price, -1 otherwise.
    fn direction_sign(&self) -> f64;
    fn tick_size(&self) -> f64;
    /// Currency value of a one-tick move on one lot.
    fn tick_value(&self) -> f64;
    fn exposure(&self) -> Exposure;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssetMappingError {
    #[error("instrument {symbol} is not tradable as a leg (kind: {kind})")]
    NotTradable { symbol: String, kind: String },

    #[error("option {symbol} ({right:?}) cannot carry {exposure:?} exposure")]
    RightMismatch {
        symbol: String,
        right: OptionRight,
        exposure: Exposure,
    },

    #[error("no leg configured for {exposure:?} exposure")]
    MissingLeg { exposure: Exposure },
}

/// An instrument bound to the way a position on it behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLeg {
    pub instrument: Instrument,
    pub variant: LegVariant,
}

impl TradeLeg {
    /// Resolve an instrument into the leg that carries `exposure`.
    pub fn resolve(instrument: &Instrument, exposure: Exposure) -> Result<Self, AssetMappingError> {
        let variant = match &instrument.kind {
            InstrumentKind::Option { right, .. } => {
                let matches = matches!(
                    (right, exposure),
                    (OptionRight::Call, Exposure::Increase) | (OptionRight::Put, Exposure::Decrease)
                );
                if !matches {
                    return Err(AssetMappingError::RightMismatch {
                        symbol: instrument.symbol.clone(),
                        right: *right,
                        exposure,
                    });
                }
                LegVariant::OptionLeg { right: *right }
            }
            InstrumentKind::Future { .. } => LegVariant::FutureLeg {
                short: exposure == Exposure::Decrease,
            },
            InstrumentKind::Index => {
                return Err(AssetMappingError::NotTradable {
                    symbol: instrument.symbol.clone(),
                    kind: "INDEX".into(),
                })
            }
            InstrumentKind::Equity => {
                return Err(AssetMappingError::NotTradable {
                    symbol: instrument.symbol.clone(),
                    kind: "EQUITY".into(),
                })
            }
        };
        Ok(Self { instrument: instrument.clone(), variant })
    }

    pub fn symbol(&self) -> &str {
        &self.instrument.symbol
    }

    /// Round a protective stop onto the tick grid, on the tight side.
    pub fn round_stop(&self, price: f64) -> f64 {
        let policy = if self.direction_sign() > 0.0 {
            TickPolicy::RoundUp
        } else {
            TickPolicy::RoundDown
        };
        self.instrument.round_price(price, policy)
    }

    pub fn round_target(&self, price: f64) -> f64 {
        self.instrument.round_price(price, TickPolicy::RoundNearest)
    }
}

impl LegCapability for TradeLeg {
    fn direction_sign(&self) -> f64 {
        match self.variant {
            LegVariant::OptionLeg { .. } => 1.0,
            LegVariant::FutureLeg { short: false } => 1.0,
            LegVariant::FutureLeg { short: true } => -1.0,
        }
    }

    fn tick_size(&self) -> f64 {
        self.instrument.tick_size
    }

    fn tick_value(&self) -> f64 {
        self.instrument.tick_size * self.instrument.lot_size
    }

    fn exposure(&self) -> Exposure {
        match self.variant {
            LegVariant::OptionLeg { right: OptionRight::Call } => Exposure::Increase,
            LegVariant::OptionLeg { right: OptionRight::Put } => Exposure::Decrease,
            LegVariant::FutureLeg { short: false } => Exposure::Increase,
            LegVariant::FutureLeg { short: true } => Exposure::Decrease,
        }
    }
}

/// The pair of legs a session trades, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct LegBook {
    increase: TradeLeg,
    decrease: TradeLeg,
}

impl LegBook {
    /// Build from the configured leg instruments.
    ///
    /// Each exposure takes the first instrument that resolves for it. A single
    /// future covers both directions.
    pub fn from_instruments(legs: &[Instrument]) -> Result<Self, AssetMappingError> {
        // Any INDEX/EQUITY entry is a configuration error, not something to skip.
        for inst in legs {
            if matches!(inst.kind, InstrumentKind::Index | InstrumentKind::Equity) {
                TradeLeg::resolve(inst, Exposure::Increase)?;
            }
        }
        let increase = Self::pick(legs, Exposure::Increase)?;
        let decrease = Self::pick(legs, Exposure::Decrease)?;
        Ok(Self { increase, decrease })
    }

    fn pick(legs: &[Instrument], exposure: Exposure) -> Result<TradeLeg, AssetMappingError> {
        legs.iter()
            .find_map(|inst| TradeLeg::resolve(inst, exposure).ok())
            .ok_or(AssetMappingError::MissingLeg { exposure })
    }

    pub fn leg_for(&self, exposure: Exposure) -> &TradeLeg {
        match exposure {
            Exposure::Increase => &self.increase,
            Exposure::Decrease => &self.decrease,
        }
    }

    /// Distinct traded symbols.
    pub fn symbols(&self) -> Vec<&str> {
        let mut out = vec![self.increase.symbol()];
        if self.decrease.symbol() != self.increase.symbol() {
            out.push(self.decrease.symbol());
        }
        out
    }

    /// Strike of the call leg, when the session trades options.
    pub fn atm_strike(&self) -> Option<f64> {
        match self.increase.variant {
            LegVariant::OptionLeg { .. } => self.increase.instrument.strike(),
            LegVariant::FutureLeg { .. } => None,
        }
    }
}
