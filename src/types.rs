//! Core types shared by the registry, ledger and module manager

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of gateway a client asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayType {
    /// Simulated market data
    Sim,
    /// Simulated trading venue (served by accounts)
    SimTrade,
    /// Historical market data replay
    Playback,
}

impl fmt::Display for GatewayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayType::Sim => write!(f, "SIM"),
            GatewayType::SimTrade => write!(f, "SIM_TRADE"),
            GatewayType::Playback => write!(f, "PLAYBACK"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    #[default]
    Sim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModulePurpose {
    #[default]
    Live,
    Backtest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleState {
    #[default]
    Disabled,
    Running,
}

impl ModuleState {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            ModuleState::Running
        } else {
            ModuleState::Disabled
        }
    }
}

/// Which side of the book a position or lot sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn sign(&self) -> i64 {
        match self {
            PositionSide::Long => 1,
            PositionSide::Short => -1,
        }
    }
}

/// Trade direction of a fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    OpenLong,
    CloseLong,
    OpenShort,
    CloseShort,
}

impl Direction {
    /// Side of the position this direction acts on
    pub fn side(&self) -> PositionSide {
        match self {
            Direction::OpenLong | Direction::CloseLong => PositionSide::Long,
            Direction::OpenShort | Direction::CloseShort => PositionSide::Short,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Direction::OpenLong | Direction::OpenShort)
    }

    /// Signed change applied to `net_volume` for a fill of `volume`
    pub fn signed_delta(&self, volume: i64) -> i64 {
        match self {
            Direction::OpenLong | Direction::CloseShort => volume,
            Direction::OpenShort | Direction::CloseLong => -volume,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::OpenLong => write!(f, "OPEN_LONG"),
            Direction::CloseLong => write!(f, "CLOSE_LONG"),
            Direction::OpenShort => write!(f, "OPEN_SHORT"),
            Direction::CloseShort => write!(f, "CLOSE_SHORT"),
        }
    }
}

/// A fill submitted against a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub instrument: String,
    pub direction: Direction,
    pub price: Decimal,
    pub volume: i64,
}

/// Trimmed value of a required text field
pub fn required_field(field: &str, value: &str) -> crate::error::Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(crate::error::DeskError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}
