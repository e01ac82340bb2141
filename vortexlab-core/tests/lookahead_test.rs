//! Look-ahead contamination tests for every indicator.
//!
//! No indicator value at bar t may depend on price data from bar t+1 or later.
//!
//! Method: compute on a truncated series (bars 0..100) and the full series
//! (bars 0..200). Bars 0..100 must be identical between both runs.

use chrono::NaiveDate;
use vortexlab_core::config::IndicatorConfig;
use vortexlab_core::domain::Candle;
use vortexlab_core::indicators::*;

/// N five-minute bars of deterministic pseudo-random OHLC data (LCG walk).
fn make_test_candles(n: usize) -> Vec<Candle> {
    let base = NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(9, 15, 0)
        .unwrap();
    let mut price = 100.0;
    (0..n)
        .map(|i| {
            let seed = (i as u64).wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let change = ((seed >> 33) % 200) as f64 / 100.0 - 1.0;
            price = (price + change).max(10.0);
            let open = price - 0.4;
            let close = price + 0.2;
            let high = open.max(close) + 1.0 + (seed % 7) as f64 * 0.1;
            let low = open.min(close) - 1.0 - (seed % 5) as f64 * 0.1;
            Candle::new(base + chrono::Duration::minutes(5 * i as i64), open, high, low, close, 100.0)
        })
        .collect()
}

fn assert_no_lookahead(indicator: &dyn Indicator, full: &[Candle], truncated_len: usize) {
    let full_result = indicator.compute(full);
    let truncated_result = indicator.compute(&full[..truncated_len]);

    assert_eq!(truncated_result.len(), truncated_len, "{}: length", indicator.name());
    assert_eq!(full_result.len(), full.len(), "{}: length", indicator.name());

    for i in 0..truncated_len {
        let (t, f) = (truncated_result[i], full_result[i]);
        if t.is_nan() && f.is_nan() {
            continue;
        }
        assert!(
            (t - f).abs() < 1e-10,
            "{}: look-ahead at bar {i} (truncated={t}, full={f})",
            indicator.name()
        );
    }
}

#[test]
fn no_lookahead_ema() {
    let candles = make_test_candles(200);
    for period in [5, 21, 50] {
        assert_no_lookahead(&Ema::new(period), &candles, 100);
    }
}

#[test]
fn no_lookahead_vortex() {
    let candles = make_test_candles(200);
    for period in [2, 14, 21] {
        assert_no_lookahead(&Vortex::new(period, VortexLine::Plus), &candles, 100);
        assert_no_lookahead(&Vortex::new(period, VortexLine::Minus), &candles, 100);
    }
}

#[test]
fn no_lookahead_choppiness() {
    let candles = make_test_candles(200);
    for period in [2, 14, 28] {
        assert_no_lookahead(&Choppiness::new(period), &candles, 100);
    }
}

#[test]
fn no_lookahead_atr() {
    let candles = make_test_candles(200);
    for period in [1, 14] {
        assert_no_lookahead(&Atr::new(period), &candles, 100);
    }
}

#[test]
fn no_lookahead_macd_histogram() {
    let candles = make_test_candles(200);
    for (fast, slow, signal) in [(3, 6, 3), (12, 26, 9)] {
        assert_no_lookahead(&MacdHistogram::new(fast, slow, signal), &candles, 100);
    }
}

#[test]
fn lookback_matches_leading_nans() {
    let candles = make_test_candles(120);
    let indicators: Vec<Box<dyn Indicator>> = vec![
        Box::new(Ema::new(21)),
        Box::new(Vortex::new(21, VortexLine::Plus)),
        Box::new(Vortex::new(21, VortexLine::Minus)),
        Box::new(Choppiness::new(14)),
        Box::new(Atr::new(14)),
        Box::new(MacdHistogram::new(12, 26, 9)),
    ];
    for ind in &indicators {
        let values = ind.compute(&candles);
        let lookback = ind.lookback();
        assert!(values[..lookback].iter().all(|v| v.is_nan()), "{}", ind.name());
        assert!(values[lookback..].iter().all(|v| v.is_finite()), "{}", ind.name());
    }
}

/// The bar-close reading at bar k is the same whether the engine sees history
/// up to k or a longer series evaluated at k.
#[test]
fn engine_reading_is_causal() {
    let candles = make_test_candles(200);
    let engine = IndicatorEngine::new(&IndicatorConfig::default());
    let full = engine.evaluate(&candles[..150], 0);
    let again = engine.evaluate(&candles[..150], 0);
    assert_eq!(full, again);

    let IndicatorReading::Ready(snap) = full else {
        panic!("150 bars should be enough for default periods");
    };
    assert_eq!(snap.bar_index, 149);
    assert_eq!(snap.close, candles[149].close);

    let ema = Ema::new(21).compute(&candles)[149];
    assert!((snap.ema - ema).abs() < 1e-10);
}
