//! Candle sources used during warm-up.
//!
//! A `CandleSource` abstracts the historical and intraday endpoints so the
//! session can be driven from CSV files or in-memory fixtures. Calls are
//! blocking and only happen before the consumer loop starts.

use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::{Candle, Instrument};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unparseable timestamp '{value}'")]
    BadTimestamp { value: String },

    #[error("no data configured for instrument '{symbol}'")]
    UnknownInstrument { symbol: String },
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl FetchRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        t >= self.start && t < self.end
    }
}

pub trait CandleSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Candles for `instrument` whose `open_time` falls in `range`.
    fn fetch(&self, instrument: &Instrument, range: &FetchRange) -> Result<Vec<Candle>, SourceError>;
}

/// Parse `YYYY-MM-DD HH:MM:SS` or the ISO `T`-separated form.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, SourceError> {
    let trimmed = value.trim();
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| SourceError::BadTimestamp { value: value.to_string() })
}

/// In-memory candles keyed by symbol.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    candles: HashMap<String, Vec<Candle>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), candles: HashMap::new() }
    }

    pub fn with_candles(mut self, symbol: impl Into<String>, candles: Vec<Candle>) -> Self {
        self.candles.insert(symbol.into(), candles);
        self
    }
}

impl CandleSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, instrument: &Instrument, range: &FetchRange) -> Result<Vec<Candle>, SourceError> {
        let all = self
            .candles
            .get(&instrument.symbol)
            .ok_or_else(|| SourceError::UnknownInstrument { symbol: instrument.symbol.clone() })?;
        Ok(all
            .iter()
            .filter(|c| range.contains(c.open_time))
            .copied()
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct CandleRow {
    open_time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Candles read from one CSV file per symbol.
///
/// Header: `open_time,open,high,low,close,volume` (volume optional).
#[derive(Debug, Clone, Default)]
pub struct CsvSource {
    name: String,
    files: HashMap<String, PathBuf>,
}

impl CsvSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), files: HashMap::new() }
    }

    pub fn with_file(mut self, symbol: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.insert(symbol.into(), path.into());
        self
    }

    /// Read every candle in a file.
    pub fn read_file(path: &Path) -> Result<Vec<Candle>, SourceError> {
        let file = std::fs::File::open(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
        let mut out = Vec::new();
        for row in reader.deserialize::<CandleRow>() {
            let row = row?;
            out.push(Candle::new(
                parse_timestamp(&row.open_time)?,
                row.open,
                row.high,
                row.low,
                row.close,
                row.volume,
            ));
        }
        Ok(out)
    }
}

impl CandleSource for CsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, instrument: &Instrument, range: &FetchRange) -> Result<Vec<Candle>, SourceError> {
        let path = self
            .files
            .get(&instrument.symbol)
            .ok_or_else(|| SourceError::UnknownInstrument { symbol: instrument.symbol.clone() })?;
        let mut candles = Self::read_file(path)?;
        candles.retain(|c| range.contains(c.open_time));
        Ok(candles)
    }
}
