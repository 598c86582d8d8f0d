//! Trading module lifecycle
//!
//! A module pairs an opaque strategy with an account, an allocated capital
//! target and one instrument. Modules start `Disabled`, flip between
//! `Disabled` and `Running`, and can only be deleted while `Disabled`.
//!
//! ```text
//! create ──▶ Disabled ◀──▶ Running
//!               │
//!               ▼
//!            delete
//! ```


use crate::account::Account;
use crate::error::{DeskError, Result};
use crate::gateway::Gateway;
use crate::types::{required_field, ModulePurpose, ModuleState};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Full module settings payload used by create and update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModuleSpec {
    pub name: String,
    pub purpose: ModulePurpose,
    pub strategy_ref: String,
    pub operation_interval_seconds: i64,
    pub bound_account: String,
    pub allocated_capital: Decimal,
    pub subscribed_instrument: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub name: String,
    pub purpose: ModulePurpose,
    pub strategy_ref: String,
    pub operation_interval_seconds: u64,
    pub bound_account: String,
    pub allocated_capital: Decimal,
    pub subscribed_instrument: String,
    pub enabled: bool,
    pub state: ModuleState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Module {
    pub fn is_running(&self) -> bool {
        self.state == ModuleState::Running
    }
}

/// Lookups needed to validate a module's bindings
pub trait BindingResolver {
    fn strategy_registered(&self, strategy_ref: &str) -> bool;
    fn account(&self, id: &str) -> Result<&Account>;
    fn gateway(&self, id: &str) -> Result<&Gateway>;
}

/// Settings that passed validation
struct ValidSettings {
    name: String,
    purpose: ModulePurpose,
    strategy_ref: String,
    operation_interval_seconds: u64,
    bound_account: String,
    allocated_capital: Decimal,
    subscribed_instrument: String,
}

fn validate(spec: &ModuleSpec, resolver: &impl BindingResolver) -> Result<ValidSettings> {
    let name = required_field("module name", &spec.name)?;
    let strategy_ref = required_field("strategy", &spec.strategy_ref)?;
    let bound_account = required_field("bound account", &spec.bound_account)?;
    let subscribed_instrument = required_field("instrument", &spec.subscribed_instrument)?;

    if spec.operation_interval_seconds < 0 {
        return Err(DeskError::Validation(format!(
            "Operation interval must be >= 0, got {}",
            spec.operation_interval_seconds
        )));
    }
    if spec.allocated_capital < Decimal::ZERO {
        return Err(DeskError::Validation(format!(
            "Allocated capital must be >= 0, got {}",
            spec.allocated_capital
        )));
    }
    if !resolver.strategy_registered(&strategy_ref) {
        return Err(DeskError::Validation(format!("Unknown strategy {}", strategy_ref)));
    }

    let account = resolver.account(&bound_account)?;
    // backtests replay data and never route through a live connection
    if spec.purpose == ModulePurpose::Live && !account.is_connected() {
        return Err(DeskError::Validation(format!(
            "Account {} is not connected",
            bound_account
        )));
    }
    let gateway = resolver.gateway(&account.bound_market_gateway)?;
    if !gateway.subscribes(&subscribed_instrument) {
        return Err(DeskError::Validation(format!(
            "Instrument {} is not subscribed by gateway {}",
            subscribed_instrument, gateway.id
        )));
    }

    Ok(ValidSettings {
        name,
        purpose: spec.purpose,
        strategy_ref,
        operation_interval_seconds: spec.operation_interval_seconds as u64,
        bound_account,
        allocated_capital: spec.allocated_capital,
        subscribed_instrument,
    })
}

#[derive(Debug, Default)]
pub struct ModuleManager {
    modules: HashMap<String, Module>,
}

impl ModuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, spec: &ModuleSpec, resolver: &impl BindingResolver) -> Result<Module> {
        let settings = validate(spec, resolver)?;
        if self.modules.contains_key(&settings.name) {
            return Err(DeskError::Conflict(format!(
                "Module {} already exists",
                settings.name
            )));
        }

        let now = Utc::now();
        let module = Module {
            name: settings.name,
            purpose: settings.purpose,
            strategy_ref: settings.strategy_ref,
            operation_interval_seconds: settings.operation_interval_seconds,
            bound_account: settings.bound_account,
            allocated_capital: settings.allocated_capital,
            subscribed_instrument: settings.subscribed_instrument,
            enabled: false,
            state: ModuleState::Disabled,
            created_at: now,
            updated_at: now,
        };
        info!(
            module = %module.name,
            strategy = %module.strategy_ref,
            account = %module.bound_account,
            capital = %module.allocated_capital,
            "Module created"
        );
        self.modules.insert(module.name.clone(), module.clone());
        Ok(module)
    }

    /// Replace every mutable setting; run state is preserved
    pub fn update(&mut self, spec: &ModuleSpec, resolver: &impl BindingResolver) -> Result<Module> {
        let settings = validate(spec, resolver)?;
        let module = self.get_mut(&settings.name)?;

        if module.is_running() && module.bound_account != settings.bound_account {
            let account = resolver.account(&settings.bound_account)?;
            if !account.is_connected() {
                return Err(DeskError::Validation(format!(
                    "Running module {} cannot rebind to disconnected account {}",
                    module.name, account.id
                )));
            }
        }

        module.purpose = settings.purpose;
        module.strategy_ref = settings.strategy_ref;
        module.operation_interval_seconds = settings.operation_interval_seconds;
        module.bound_account = settings.bound_account;
        module.allocated_capital = settings.allocated_capital;
        module.subscribed_instrument = settings.subscribed_instrument;
        module.updated_at = Utc::now();
        info!(module = %module.name, capital = %module.allocated_capital, "Module updated");
        Ok(module.clone())
    }

    pub fn set_enabled(
        &mut self,
        name: &str,
        enabled: bool,
        resolver: &impl BindingResolver,
    ) -> Result<Module> {
        let module = self.get_mut(name)?;
        if enabled {
            let account = resolver.account(&module.bound_account)?;
            if !account.is_connected() {
                warn!(module = %name, account = %account.id, "Enable rejected: account offline");
                return Err(DeskError::Validation(format!(
                    "Account {} must be connected before enabling module {}",
                    account.id, name
                )));
            }
        }
        module.enabled = enabled;
        module.state = ModuleState::from_enabled(enabled);
        module.updated_at = Utc::now();
        info!(module = %name, state = ?module.state, "Module state changed");
        Ok(module.clone())
    }

    pub fn toggle(&mut self, name: &str, resolver: &impl BindingResolver) -> Result<Module> {
        let enabled = self.get(name)?.enabled;
        self.set_enabled(name, !enabled, resolver)
    }

    /// Remove a module; only disabled modules can go
    pub fn remove(&mut self, name: &str) -> Result<Module> {
        let module = self.get(name)?;
        if module.is_running() {
            warn!(module = %name, "Delete rejected: module is running");
            return Err(DeskError::Conflict(format!(
                "Module {} is running; disable it before deleting",
                name
            )));
        }
        let module = self
            .modules
            .remove(name)
            .ok_or_else(|| DeskError::NotFound(format!("Module {}", name)))?;
        info!(module = %name, "Module deleted");
        Ok(module)
    }

    /// Modules bound to the given account
    pub fn bound_to_account(&self, account_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .values()
            .filter(|m| m.bound_account == account_id)
            .map(|m| m.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Result<&Module> {
        self.modules
            .get(name)
            .ok_or_else(|| DeskError::NotFound(format!("Module {}", name)))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Module> {
        self.modules
            .get_mut(name)
            .ok_or_else(|| DeskError::NotFound(format!("Module {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn list(&self) -> Vec<Module> {
        let mut modules: Vec<Module> = self.modules.values().cloned().collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        modules
    }

    pub(crate) fn insert(&mut self, module: Module) {
        self.modules.insert(module.name.clone(), module);
    }
}
