//! Strategy gate: candle gate plus the once-per-bar signal state machine

pub mod candle_gate;
pub mod gate;

pub use candle_gate::CandleGate;
pub use gate::{
    evaluate_entry, GateContext, GateState, GateTransition, PendingSignal, StrategyGate,
};
