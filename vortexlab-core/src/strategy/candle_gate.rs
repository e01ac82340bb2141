/// Candle gate: closed-bar count required before the strategy may arm.
///
/// Monotonic within a session: the observed count never decreases, so once
/// open the gate stays open.
#[derive(Debug, Clone)]
pub struct CandleGate {
    min_bars: usize,
    bars_seen: usize,
}

impl CandleGate {
    pub fn new(min_bars: usize) -> Self {
        Self {
            min_bars,
            bars_seen: 0,
        }
    }

    pub fn observe(&mut self, bar_count: usize) {
        self.bars_seen = self.bars_seen.max(bar_count);
    }

    pub fn is_open(&self) -> bool {
        self.bars_seen >= self.min_bars
    }

    pub fn bars_until_open(&self) -> usize {
        self.min_bars.saturating_sub(self.bars_seen)
    }

    pub fn min_bars(&self) -> usize {
        self.min_bars
    }
}
