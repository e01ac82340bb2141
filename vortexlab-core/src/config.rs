//! Serializable engine configuration.
//!
//! Every section has defaults so a TOML file only needs `[instruments]`.
//! Thresholds for the entry condition and the trailing buffer are tuning
//! parameters, so they all live here rather than in the strategy code.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::Instrument;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration for one trading session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    pub instruments: InstrumentsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentsConfig {
    /// Series the indicators and signals are computed on.
    pub underlying: Instrument,
    /// Tradable legs (CALL + PUT options, or one FUTURE).
    pub legs: Vec<Instrument>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub bar_interval_minutes: u32,
    /// Candle gate: closed bars required before the strategy arms.
    pub min_warmup_bars: usize,
    pub data_gap_secs: i64,
    pub eod_cutoff: NaiveTime,
    pub entry_window: Option<EntryWindow>,
    /// Calendar days of history requested from the historical source.
    pub history_days: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bar_interval_minutes: 5,
            min_warmup_bars: 13,
            data_gap_secs: 300,
            eod_cutoff: hms(15, 25),
            entry_window: Some(EntryWindow {
                start: hms(9, 30),
                end: hms(15, 10),
            }),
            history_days: 10,
        }
    }
}

/// Inclusive time-of-day range in which new entries may be signalled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EntryWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl EntryWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.start && t <= self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ema_period: usize,
    pub vortex_period: usize,
    pub choppiness_period: usize,
    pub atr_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    /// Trailing closed bars fed to every indicator.
    pub window: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_period: 21,
            vortex_period: 21,
            choppiness_period: 14,
            atr_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            window: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrategyConfig {
    /// Entries require choppiness strictly below this.
    pub choppiness_threshold: f64,
    /// Emit EXIT when the close crosses the EMA against an open position.
    pub exit_on_ema_reversal: bool,
    /// Emit EXIT when the MACD histogram turns against an open position.
    pub exit_on_macd_histogram: bool,
    /// Only emit EXIT after the profit lock armed.
    pub exit_requires_profit_lock: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            choppiness_threshold: 57.0,
            exit_on_ema_reversal: true,
            exit_on_macd_histogram: true,
            exit_requires_profit_lock: true,
        }
    }
}

/// How the initial protective stop distance is chosen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitialStop {
    /// min(multiplier * ATR, max_points); `fallback_points` while ATR is not ready.
    Atr {
        multiplier: f64,
        max_points: f64,
        fallback_points: f64,
    },
    Fixed { points: f64 },
}

impl InitialStop {
    pub fn distance(&self, atr: Option<f64>) -> f64 {
        match *self {
            InitialStop::Atr {
                multiplier,
                max_points,
                fallback_points,
            } => match atr {
                Some(a) if a.is_finite() && a > 0.0 => (multiplier * a).min(max_points),
                _ => fallback_points,
            },
            InitialStop::Fixed { points } => points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    pub initial_stop: InitialStop,
    pub take_profit_points: f64,
    /// Stop moves to entry + this once the first target is reached.
    pub lock_buffer_points: f64,
    pub trail_atr_multiplier: f64,
    pub lots: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_stop: InitialStop::Atr {
                multiplier: 2.0,
                max_points: 25.0,
                fallback_points: 20.0,
            },
            take_profit_points: 10.0,
            lock_buffer_points: 5.0,
            trail_atr_multiplier: 0.5,
            lots: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    pub capacity: usize,
    pub backpressure_ms: u64,
    pub drain_grace_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            backpressure_ms: 5,
            drain_grace_ms: 2000,
        }
    }
}

impl FeedConfig {
    pub fn backpressure(&self) -> Duration {
        Duration::from_millis(self.backpressure_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnapshotConfig {
    pub cadence_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { cadence_ms: 1000 }
    }
}

impl SnapshotConfig {
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms.max(1))
    }
}

impl EngineConfig {
    /// Defaults for every section around the given instruments.
    pub fn for_instruments(underlying: Instrument, legs: Vec<Instrument>) -> Self {
        Self {
            session: SessionConfig::default(),
            indicators: IndicatorConfig::default(),
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
            feed: FeedConfig::default(),
            snapshot: SnapshotConfig::default(),
            instruments: InstrumentsConfig { underlying, legs },
        }
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ind = &self.indicators;
        if ind.ema_period == 0 || ind.vortex_period == 0 || ind.atr_period == 0 {
            return Err(ConfigError::Invalid("indicator periods must be >= 1".into()));
        }
        if ind.macd_fast == 0 || ind.macd_signal == 0 || ind.macd_fast >= ind.macd_slow {
            return Err(ConfigError::Invalid(
                "macd periods must be >= 1 with fast < slow".into(),
            ));
        }
        if ind.choppiness_period < 2 {
            return Err(ConfigError::Invalid("choppiness_period must be >= 2".into()));
        }
        if ind.window < self.required_bars() {
            return Err(ConfigError::Invalid(format!(
                "indicator window {} is shorter than the {} bars the indicators need",
                ind.window,
                self.required_bars()
            )));
        }
        let s = &self.session;
        if s.bar_interval_minutes == 0 || 1440 % s.bar_interval_minutes != 0 {
            return Err(ConfigError::Invalid(
                "bar_interval_minutes must divide a day".into(),
            ));
        }
        if s.data_gap_secs <= 0 {
            return Err(ConfigError::Invalid("data_gap_secs must be positive".into()));
        }
        if let Some(w) = s.entry_window {
            if w.start > w.end {
                return Err(ConfigError::Invalid("entry_window start is after end".into()));
            }
        }
        let r = &self.risk;
        let stop_ok = match r.initial_stop {
            InitialStop::Atr {
                multiplier,
                max_points,
                fallback_points,
            } => multiplier > 0.0 && max_points > 0.0 && fallback_points > 0.0,
            InitialStop::Fixed { points } => points > 0.0,
        };
        if !stop_ok {
            return Err(ConfigError::Invalid("initial stop distances must be positive".into()));
        }
        if r.take_profit_points <= 0.0 || r.lock_buffer_points < 0.0 || r.trail_atr_multiplier < 0.0
        {
            return Err(ConfigError::Invalid("risk points must be non-negative".into()));
        }
        if r.lots == 0 {
            return Err(ConfigError::Invalid("lots must be >= 1".into()));
        }
        if self.feed.capacity == 0 {
            return Err(ConfigError::Invalid("feed capacity must be >= 1".into()));
        }
        let all = std::iter::once(&self.instruments.underlying).chain(&self.instruments.legs);
        for inst in all {
            if inst.tick_size <= 0.0 || inst.lot_size <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{}: tick_size and lot_size must be positive",
                    inst.symbol
                )));
            }
        }
        if self.instruments.legs.is_empty() {
            return Err(ConfigError::Invalid("at least one leg is required".into()));
        }
        Ok(())
    }

    /// Closed bars the indicator engine needs for a ready reading.
    pub fn required_bars(&self) -> usize {
        let ind = &self.indicators;
        ind.ema_period
            .max(ind.vortex_period + 2)
            .max(ind.choppiness_period + 1)
    }

    pub fn data_gap(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session.data_gap_secs)
    }

    /// Every instrument the session subscribes to, underlying first.
    pub fn all_instruments(&self) -> Vec<&Instrument> {
        let mut out = vec![&self.instruments.underlying];
        for leg in &self.instruments.legs {
            if !out.iter().any(|i| i.symbol == leg.symbol) {
                out.push(leg);
            }
        }
        out
    }
}

fn hms(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstrumentKind, OptionRight};

    const MINIMAL: &str = r#"
[instruments]
underlying = { symbol = "NIFTY", tick_size = 0.05, lot_size = 1.0, kind = { type = "INDEX" } }
legs = [
    { symbol = "NIFTY24MAR22500CE", tick_size = 0.05, lot_size = 75.0, kind = { type = "OPTION", right = "CALL", strike = 22500.0 } },
    { symbol = "NIFTY24MAR22500PE", tick_size = 0.05, lot_size = 75.0, kind = { type = "OPTION", right = "PUT", strike = 22500.0 } },
]
"#;

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg = EngineConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.session.min_warmup_bars, 13);
        assert_eq!(cfg.session.data_gap_secs, 300);
        assert_eq!(cfg.session.eod_cutoff, NaiveTime::from_hms_opt(15, 25, 0).unwrap());
        assert_eq!(cfg.indicators.ema_period, 21);
        assert_eq!(cfg.indicators.vortex_period, 21);
        assert_eq!(cfg.strategy.choppiness_threshold, 57.0);
        assert!(cfg.strategy.exit_on_macd_histogram);
        assert_eq!((cfg.indicators.macd_fast, cfg.indicators.macd_slow, cfg.indicators.macd_signal), (12, 26, 9));
        assert_eq!(cfg.risk.take_profit_points, 10.0);
        assert_eq!(cfg.instruments.legs.len(), 2);
        assert_eq!(
            cfg.instruments.legs[1].kind,
            InstrumentKind::Option { right: OptionRight::Put, strike: 22500.0 }
        );
        assert_eq!(cfg.required_bars(), 23);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let toml = format!(
            "{MINIMAL}\n[session]\nmin_warmup_bars = 20\neod_cutoff = \"15:15:00\"\n\n[risk]\ninitial_stop = {{ type = \"FIXED\", points = 12.0 }}\n"
        );
        let cfg = EngineConfig::from_toml(&toml).unwrap();
        assert_eq!(cfg.session.min_warmup_bars, 20);
        assert_eq!(cfg.session.bar_interval_minutes, 5);
        assert_eq!(cfg.session.eod_cutoff, NaiveTime::from_hms_opt(15, 15, 0).unwrap());
        assert_eq!(cfg.risk.initial_stop, InitialStop::Fixed { points: 12.0 });
        assert_eq!(cfg.risk.lock_buffer_points, 5.0);
    }

    #[test]
    fn missing_instruments_is_a_parse_error() {
        let err = EngineConfig::from_toml("[session]\nmin_warmup_bars = 13\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_period_is_rejected() {
        let toml = format!("{MINIMAL}\n[indicators]\nema_period = 0\n");
        let err = EngineConfig::from_toml(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn macd_fast_must_be_shorter_than_slow() {
        let toml = format!("{MINIMAL}\n[indicators]\nmacd_fast = 26\nmacd_slow = 12\n");
        assert!(matches!(EngineConfig::from_toml(&toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn inverted_entry_window_is_rejected() {
        let toml = format!(
            "{MINIMAL}\n[session.entry_window]\nstart = \"15:00:00\"\nend = \"09:30:00\"\n"
        );
        assert!(EngineConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn atr_stop_distance_is_capped_and_falls_back() {
        let stop = InitialStop::Atr {
            multiplier: 2.0,
            max_points: 25.0,
            fallback_points: 20.0,
        };
        assert_eq!(stop.distance(Some(4.0)), 8.0);
        assert_eq!(stop.distance(Some(40.0)), 25.0);
        assert_eq!(stop.distance(None), 20.0);
        assert_eq!(stop.distance(Some(f64::NAN)), 20.0);
        assert_eq!(InitialStop::Fixed { points: 7.5 }.distance(Some(100.0)), 7.5);
    }

    #[test]
    fn toml_round_trip_preserves_config() {
        let cfg = EngineConfig::from_toml(MINIMAL).unwrap();
        let text = cfg.to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), cfg);
    }

    #[test]
    fn from_file_reports_missing_path() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/vortexlab.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn from_file_loads_minimal_config() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let cfg = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.instruments.underlying.symbol, "NIFTY");
        assert_eq!(cfg.session.min_warmup_bars, 13);
    }

    #[test]
    fn all_instruments_deduplicates_future_underlying() {
        let fut = Instrument::future("CRUDEOIL", 1.0, 100.0);
        let cfg = EngineConfig::for_instruments(fut.clone(), vec![fut]);
        assert_eq!(cfg.all_instruments().len(), 1);
    }
}
