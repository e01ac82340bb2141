//! Warm-up reconstruction: historical + intraday → one candle series.
//!
//! Union by `open_time`; intraday wins on a shared `open_time`; ascending
//! order; one bar per `open_time`. Insane bars (high < low, non-positive
//! prices, NaN) are dropped before the union.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

use super::series::CandleSeries;
use crate::domain::Candle;
use crate::error::EngineError;

/// The merged series had fewer bars than the candle gate needs.
///
/// Carries the partial series so the session can keep running gated while
/// live bars accumulate.
#[derive(Debug, Error)]
#[error("incomplete warmup for {}: {} bars merged, {} required", .series.instrument(), .series.len(), .required)]
pub struct IncompleteWarmupError {
    pub series: CandleSeries,
    pub required: usize,
}

impl From<&IncompleteWarmupError> for EngineError {
    fn from(e: &IncompleteWarmupError) -> Self {
        EngineError::IncompleteWarmup {
            instrument: e.series.instrument().to_string(),
            bars: e.series.len(),
            required: e.required,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarmupMerger {
    instrument: String,
    interval_minutes: u32,
    min_bars: usize,
}

impl WarmupMerger {
    pub fn new(instrument: impl Into<String>, interval_minutes: u32, min_bars: usize) -> Self {
        Self {
            instrument: instrument.into(),
            interval_minutes,
            min_bars,
        }
    }

    pub fn merge(
        &self,
        historical: &[Candle],
        intraday: &[Candle],
    ) -> Result<CandleSeries, IncompleteWarmupError> {
        let mut by_time: BTreeMap<chrono::NaiveDateTime, Candle> = BTreeMap::new();
        let mut rejected = 0usize;
        let mut overridden = 0usize;

        for c in historical {
            if c.is_sane() {
                by_time.insert(c.open_time, *c);
            } else {
                rejected += 1;
            }
        }
        for c in intraday {
            if !c.is_sane() {
                rejected += 1;
                continue;
            }
            if by_time.insert(c.open_time, *c).is_some() {
                overridden += 1;
            }
        }

        if rejected > 0 {
            warn!(instrument = %self.instrument, rejected, "dropped malformed warm-up bars");
        }

        let closed: Vec<Candle> = by_time.into_values().collect();
        let series = CandleSeries::from_sorted(&self.instrument, self.interval_minutes, closed);

        info!(
            instrument = %self.instrument,
            historical = historical.len(),
            intraday = intraday.len(),
            overridden,
            merged = series.len(),
            "warm-up merged"
        );

        if series.len() < self.min_bars {
            return Err(IncompleteWarmupError {
                series,
                required: self.min_bars,
            });
        }
        Ok(series)
    }
}
