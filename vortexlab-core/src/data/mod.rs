//! Candle storage, warm-up reconstruction and candle sources

pub mod series;
pub mod source;
pub mod warmup;

pub use series::{CandleSeries, SeriesUpdate};
pub use source::{parse_timestamp, CandleSource, CsvSource, FetchRange, MemorySource, SourceError};
pub use warmup::{IncompleteWarmupError, WarmupMerger};
