//! Trading Desk
//!
//! Service core behind a trading web console: market-data gateways, trading
//! accounts, strategy modules and their position ledgers.
//!
//! ## Architecture
//!
//! ```text
//! HTTP (api) → Desk ─┬─ GatewayRegistry
//!                    ├─ AccountLedger
//!                    ├─ ModuleManager
//!                    └─ PositionLedger (one book per module)
//! ```

pub mod account;
pub mod api;
pub mod config;
pub mod desk;
pub mod error;
pub mod gateway;
pub mod module;
pub mod position;
pub mod session;
pub mod snapshot;
pub mod types;
