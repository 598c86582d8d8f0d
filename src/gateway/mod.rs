//! Market-data gateway registry
//!
//! Tracks every market-data gateway the desk knows about together with its
//! connection state and subscribed instruments. Each gateway kind carries its
//! own settings payload and behaves through the [`GatewayConnection`]
//! capability.


use crate::error::{DeskError, Result};
use crate::types::{required_field, ConnectionState, GatewayType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Replay fidelity of a playback gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackPrecision {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackSpeed {
    #[default]
    Normal,
    Sprint,
}

impl PlaybackSpeed {
    /// Ticks replayed per second
    pub fn ticks_per_sec(&self) -> u32 {
        match self {
            PlaybackSpeed::Normal => 2,
            PlaybackSpeed::Sprint => 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSettings {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub precision: PlaybackPrecision,
    #[serde(default)]
    pub speed: PlaybackSpeed,
}

impl PlaybackSettings {
    fn validate(&self) -> Result<()> {
        if self.start_date > self.end_date {
            return Err(DeskError::Validation(format!(
                "Playback start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }
        Ok(())
    }
}

/// Settings payload, one variant per gateway kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewaySettings {
    Sim,
    Playback(PlaybackSettings),
}

impl GatewaySettings {
    pub fn gateway_type(&self) -> GatewayType {
        match self {
            GatewaySettings::Sim => GatewayType::Sim,
            GatewaySettings::Playback(_) => GatewayType::Playback,
        }
    }
}

/// Create-gateway request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySpec {
    pub id: String,
    #[serde(rename = "type")]
    pub gateway_type: Option<GatewayType>,
    pub subscribed_instruments: Vec<String>,
    pub playback: Option<PlaybackSettings>,
}

impl GatewaySpec {
    fn into_settings(self) -> Result<(String, GatewaySettings, BTreeSet<String>)> {
        let id = required_field("gateway id", &self.id)?;
        let gateway_type = self
            .gateway_type
            .ok_or_else(|| DeskError::Validation("gateway type is required".into()))?;

        let instruments: BTreeSet<String> = self
            .subscribed_instruments
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if instruments.is_empty() {
            return Err(DeskError::Validation(format!(
                "Gateway {} must subscribe at least one instrument",
                id
            )));
        }

        let settings = match gateway_type {
            GatewayType::Sim => GatewaySettings::Sim,
            GatewayType::Playback => {
                let playback = self.playback.ok_or_else(|| {
                    DeskError::Validation("playback settings are required for PLAYBACK".into())
                })?;
                playback.validate()?;
                GatewaySettings::Playback(playback)
            }
            GatewayType::SimTrade => {
                return Err(DeskError::Validation(
                    "SIM_TRADE gateways are created as accounts".into(),
                ))
            }
        };

        Ok((id, settings, instruments))
    }
}

/// Connect / disconnect / subscribe capability every gateway kind provides
pub trait GatewayConnection {
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self);
    fn subscribe(&mut self, instrument: &str) -> Result<()>;
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gateway {
    pub id: String,
    pub settings: GatewaySettings,
    pub connection_state: ConnectionState,
    pub subscribed_instruments: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Gateway {
    pub fn gateway_type(&self) -> GatewayType {
        self.settings.gateway_type()
    }

    pub fn subscribes(&self, instrument: &str) -> bool {
        self.subscribed_instruments.contains(instrument)
    }
}

impl GatewayConnection for Gateway {
    fn connect(&mut self) -> Result<()> {
        if self.connection_state.is_connected() {
            return Ok(());
        }
        if let GatewaySettings::Playback(playback) = &self.settings {
            playback.validate()?;
            info!(
                gateway = %self.id,
                start = %playback.start_date,
                end = %playback.end_date,
                ticks_per_sec = playback.speed.ticks_per_sec(),
                "Playback gateway armed"
            );
        }
        self.connection_state = ConnectionState::Connected;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connection_state = ConnectionState::Disconnected;
    }

    fn subscribe(&mut self, instrument: &str) -> Result<()> {
        let instrument = required_field("instrument", instrument)?;
        // replay data is fixed once a playback session is connected
        if matches!(self.settings, GatewaySettings::Playback(_)) && self.is_connected() {
            return Err(DeskError::Conflict(format!(
                "Playback gateway {} must be disconnected before changing subscriptions",
                self.id
            )));
        }
        self.subscribed_instruments.insert(instrument);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection_state.is_connected()
    }
}

/// In-memory registry of market-data gateways
#[derive(Debug, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Gateway>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, spec: GatewaySpec) -> Result<Gateway> {
        let (id, settings, subscribed_instruments) = spec.into_settings()?;
        if self.gateways.contains_key(&id) {
            return Err(DeskError::Conflict(format!("Gateway {} already exists", id)));
        }

        let gateway = Gateway {
            id: id.clone(),
            settings,
            connection_state: ConnectionState::Disconnected,
            subscribed_instruments,
            created_at: Utc::now(),
        };
        info!(gateway = %id, kind = %gateway.gateway_type(), "Gateway created");
        self.gateways.insert(id, gateway.clone());
        Ok(gateway)
    }

    pub fn connect(&mut self, id: &str) -> Result<Gateway> {
        let gateway = self.get_mut(id)?;
        let was_connected = gateway.is_connected();
        gateway.connect()?;
        if !was_connected {
            info!(gateway = %id, "Gateway connected");
        }
        Ok(gateway.clone())
    }

    pub fn disconnect(&mut self, id: &str) -> Result<Gateway> {
        let gateway = self.get_mut(id)?;
        gateway.disconnect();
        info!(gateway = %id, "Gateway disconnected");
        Ok(gateway.clone())
    }

    pub fn subscribe(&mut self, id: &str, instrument: &str) -> Result<Gateway> {
        let gateway = self.get_mut(id)?;
        gateway.subscribe(instrument)?;
        debug!(gateway = %id, instrument, "Instrument subscribed");
        Ok(gateway.clone())
    }

    /// Remove a gateway; reference checks are the caller's job
    pub fn remove(&mut self, id: &str) -> Result<Gateway> {
        self.gateways
            .remove(id)
            .ok_or_else(|| DeskError::NotFound(format!("Gateway {}", id)))
    }

    pub fn get(&self, id: &str) -> Result<&Gateway> {
        self.gateways
            .get(id)
            .ok_or_else(|| DeskError::NotFound(format!("Gateway {}", id)))
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Gateway> {
        self.gateways
            .get_mut(id)
            .ok_or_else(|| DeskError::NotFound(format!("Gateway {}", id)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.gateways.contains_key(id)
    }

    pub fn list(&self) -> Vec<Gateway> {
        let mut gateways: Vec<Gateway> = self.gateways.values().cloned().collect();
        gateways.sort_by(|a, b| a.id.cmp(&b.id));
        gateways
    }

    pub(crate) fn insert(&mut self, gateway: Gateway) {
        self.gateways.insert(gateway.id.clone(), gateway);
    }
}
