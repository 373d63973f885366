use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How a light moves to a new state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Jump to the new state, the duration is ignored by the light.
    #[default]
    Sudden,
    /// Fade to the new state over the given duration.
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

impl Effect {
    /// The quoted parameter token, e.g. `"smooth"`.
    pub fn wire_token(&self) -> String {
        quoted(&self.to_string())
    }
}

impl PowerState {
    /// The quoted parameter token, e.g. `"on"`.
    pub fn wire_token(&self) -> String {
        quoted(&self.to_string())
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let effect_str = match self {
            Effect::Sudden => "sudden",
            Effect::Smooth => "smooth",
        };
        write!(f, "{}", effect_str)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            PowerState::On => "on",
            PowerState::Off => "off",
        };
        write!(f, "{}", state_str)
    }
}

impl From<bool> for PowerState {
    fn from(on: bool) -> Self {
        if on {
            PowerState::On
        } else {
            PowerState::Off
        }
    }
}

/// Renders a string parameter token. The value is not escaped, the protocol's
/// parameters never contain quotes or backslashes.
pub fn quoted(value: &str) -> String {
    format!("\"{}\"", value)
}
