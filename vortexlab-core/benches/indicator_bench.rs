//! Criterion benchmarks for VortexLab hot paths.
//!
//! Benchmarks:
//! 1. Single indicators over a full trailing window
//! 2. Bar-close indicator engine reading
//! 3. Tick ingestion into the candle series
//! 4. Consumer engine tick step with an open position

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use vortexlab_core::config::IndicatorConfig;
use vortexlab_core::data::{CandleSeries, SeriesUpdate};
use vortexlab_core::domain::{Candle, Instrument, LiveTick};
use vortexlab_core::feed::FeedEvent;
use vortexlab_core::indicators::{
    Atr, Choppiness, Ema, Indicator, IndicatorEngine, Vortex, VortexLine,
};
use vortexlab_core::{Engine, EngineConfig};

// ── Helpers ──────────────────────────────────────────────────────────

fn base() -> chrono::NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(9, 15, 0)
        .unwrap()
}

fn make_candles(n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * 10.0;
            Candle::new(
                base() + chrono::Duration::minutes(5 * i as i64),
                close - 0.3,
                close + 1.5,
                close - 1.5,
                close,
                1000.0,
            )
        })
        .collect()
}

// ── 1. Indicators ────────────────────────────────────────────────────

fn bench_indicators(c: &mut Criterion) {
    let mut group = c.benchmark_group("indicators");
    for n in [100usize, 500] {
        let candles = make_candles(n);
        let indicators: Vec<Box<dyn Indicator>> = vec![
            Box::new(Ema::new(21)),
            Box::new(Vortex::new(21, VortexLine::Plus)),
            Box::new(Choppiness::new(14)),
            Box::new(Atr::new(14)),
        ];
        for ind in &indicators {
            group.bench_with_input(BenchmarkId::new(ind.name(), n), &candles, |b, candles| {
                b.iter(|| black_box(ind.compute(black_box(candles))))
            });
        }
    }
    group.finish();
}

// ── 2. Bar-close reading ─────────────────────────────────────────────

fn bench_bar_close(c: &mut Criterion) {
    let engine = IndicatorEngine::new(&IndicatorConfig::default());
    let series = CandleSeries::from_candles("NIFTY", 5, make_candles(500));
    c.bench_function("bar_close_reading_500", |b| {
        b.iter(|| black_box(engine.on_bar_close(black_box(&series))))
    });
}

// ── 3. Series ingestion ──────────────────────────────────────────────

fn bench_series(c: &mut Criterion) {
    let updates: Vec<SeriesUpdate> = (0..10_000)
        .map(|i| SeriesUpdate::Tick {
            timestamp: base() + chrono::Duration::seconds(i),
            price: 100.0 + (i as f64 * 0.01).sin(),
            volume: 1.0,
        })
        .collect();
    c.bench_function("series_10k_ticks", |b| {
        b.iter(|| {
            let mut series = CandleSeries::new("NIFTY", 5);
            for u in &updates {
                black_box(series.append_or_update(*u));
            }
            series.len()
        })
    });
}

// ── 4. Consumer tick step ────────────────────────────────────────────

fn bench_engine_ticks(c: &mut Criterion) {
    let future = Instrument::future("CRUDEOIL", 1.0, 100.0);
    let config = EngineConfig::for_instruments(future.clone(), vec![future]);
    let history = make_candles(200);
    let start = history.last().map(|c| c.open_time).unwrap() + chrono::Duration::minutes(5);

    c.bench_function("engine_1k_ticks", |b| {
        b.iter(|| {
            let mut engine = Engine::new(config.clone()).unwrap();
            engine.load_series(CandleSeries::from_candles("CRUDEOIL", 5, history.clone()));
            for i in 0..1000i64 {
                let tick = LiveTick::new(
                    "CRUDEOIL",
                    100.0 + (i as f64 * 0.05).sin() * 5.0,
                    start + chrono::Duration::seconds(i * 3),
                );
                black_box(engine.handle(FeedEvent::Tick(tick)));
            }
            engine.position_manager().closed_positions().len()
        })
    });
}

criterion_group!(
    benches,
    bench_indicators,
    bench_bar_close,
    bench_series,
    bench_engine_ticks
);
criterion_main!(benches);
