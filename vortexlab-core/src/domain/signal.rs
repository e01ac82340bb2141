use serde::{Deserialize, Serialize};
use std::fmt;

use super::leg::Exposure;

/// Decision produced by the strategy gate on a closed bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    None,
    EnterLongDerivativeCallLeg,
    EnterLongDerivativePutLeg,
    Exit,
}

impl Signal {
    /// Directional intent of an entry signal.
    pub fn exposure(self) -> Option<Exposure> {
        match self {
            Signal::EnterLongDerivativeCallLeg => Some(Exposure::Increase),
            Signal::EnterLongDerivativePutLeg => Some(Exposure::Decrease),
            Signal::None | Signal::Exit => None,
        }
    }

    pub fn is_entry(self) -> bool {
        self.exposure().is_some()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::None => "NONE",
            Signal::EnterLongDerivativeCallLeg => "ENTER_LONG_DERIVATIVE_CALL_LEG",
            Signal::EnterLongDerivativePutLeg => "ENTER_LONG_DERIVATIVE_PUT_LEG",
            Signal::Exit => "EXIT",
        };
        f.write_str(s)
    }
}
