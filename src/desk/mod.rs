//! Service facade
//!
//! [`Desk`] owns the configuration catalog (gateways, accounts, modules) behind
//! one lock and the position ledger beside it. Every check-then-mutate runs
//! under a single catalog write guard; fills take a read guard plus the
//! module's book mutex.


use crate::account::{Account, AccountLedger, AccountSpec};
use crate::error::{DeskError, Result};
use crate::gateway::{Gateway, GatewayRegistry, GatewaySpec};
use crate::module::{BindingResolver, Module, ModuleManager, ModuleSpec};
use crate::position::{DealRecord, FillOutcome, PositionLedger, Position};
use crate::snapshot::{DeskSnapshot, SNAPSHOT_VERSION};
use crate::types::{ConnectionState, Fill, ModuleState};
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Catalog {
    gateways: GatewayRegistry,
    accounts: AccountLedger,
    modules: ModuleManager,
}

impl Catalog {
    fn delete_gateway(&mut self, id: &str) -> Result<Gateway> {
        self.gateways.get(id)?;
        let bound = self.accounts.bound_to_gateway(id);
        if !bound.is_empty() {
            warn!(gateway = %id, accounts = ?bound, "Delete rejected: gateway in use");
            return Err(DeskError::Conflict(format!(
                "Gateway {} is bound by accounts [{}]; unbind first",
                id,
                bound.join(", ")
            )));
        }
        let gateway = self.gateways.remove(id)?;
        info!(gateway = %id, "Gateway deleted");
        Ok(gateway)
    }

    fn connect_account(&mut self, id: &str) -> Result<Account> {
        let gateway = self.accounts.get(id)?.bound_market_gateway.clone();
        if !self.gateways.contains(&gateway) {
            return Err(DeskError::Conflict(format!(
                "Account {} is bound to missing gateway {}",
                id, gateway
            )));
        }
        self.accounts.set_connection(id, ConnectionState::Connected)
    }

    fn delete_account(&mut self, id: &str) -> Result<Account> {
        self.accounts.get(id)?;
        let bound = self.modules.bound_to_account(id);
        if !bound.is_empty() {
            warn!(account = %id, modules = ?bound, "Delete rejected: account in use");
            return Err(DeskError::Conflict(format!(
                "Account {} is bound by modules [{}]; unbind first",
                id,
                bound.join(", ")
            )));
        }
        let account = self.accounts.remove(id)?;
        info!(account = %id, "Account deleted");
        Ok(account)
    }
}

struct Resolver<'a> {
    gateways: &'a GatewayRegistry,
    accounts: &'a AccountLedger,
    strategies: &'a BTreeSet<String>,
}

impl BindingResolver for Resolver<'_> {
    fn strategy_registered(&self, strategy_ref: &str) -> bool {
        self.strategies.contains(strategy_ref)
    }

    fn account(&self, id: &str) -> Result<&Account> {
        self.accounts.get(id)
    }

    fn gateway(&self, id: &str) -> Result<&Gateway> {
        self.gateways.get(id)
    }
}

/// What a `gatewayId` on the connection routes resolved to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Account(Account),
    Gateway(Gateway),
}

/// Money view of a module: allocated capital plus realised results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAccountRuntime {
    pub init_balance: Decimal,
    pub acc_close_profit: Decimal,
    pub acc_deal_volume: i64,
    pub max_profit: Decimal,
    pub max_drawdown: Decimal,
    pub available_amount: Decimal,
    pub avg_earning: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRuntime {
    pub module_name: String,
    pub state: ModuleState,
    pub account: Account,
    pub account_runtime: ModuleAccountRuntime,
    pub positions: Vec<Position>,
}

pub struct Desk {
    catalog: RwLock<Catalog>,
    ledger: PositionLedger,
    strategies: BTreeSet<String>,
    /// Bumped by every successful mutation
    revision: AtomicU64,
}

impl Desk {
    pub fn new<I, S>(strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            catalog: RwLock::new(Catalog::default()),
            ledger: PositionLedger::new(),
            strategies: strategies.into_iter().map(Into::into).collect(),
            revision: AtomicU64::new(0),
        }
    }

    /// Changes whenever a mutation commits; autosave compares it between ticks
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn committed<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_ok() {
            self.revision.fetch_add(1, Ordering::AcqRel);
        }
        result
    }

    // ---- gateways ----

    pub fn create_gateway(&self, spec: GatewaySpec) -> Result<Gateway> {
        self.committed(self.catalog.write().gateways.create(spec))
    }

    pub fn list_gateways(&self) -> Vec<Gateway> {
        self.catalog.read().gateways.list()
    }

    pub fn connect_gateway(&self, id: &str) -> Result<Gateway> {
        self.committed(self.catalog.write().gateways.connect(id))
    }

    pub fn disconnect_gateway(&self, id: &str) -> Result<Gateway> {
        self.committed(self.catalog.write().gateways.disconnect(id))
    }

    /// Add an instrument to a gateway's subscriptions
    pub fn subscribe_instrument(&self, id: &str, instrument: &str) -> Result<Gateway> {
        self.committed(self.catalog.write().gateways.subscribe(id, instrument))
    }

    pub fn delete_gateway(&self, id: &str) -> Result<Gateway> {
        self.committed(self.catalog.write().delete_gateway(id))
    }

    /// Connect whatever `id` names; accounts win over gateways
    pub fn connect_endpoint(&self, id: &str) -> Result<Endpoint> {
        let mut catalog = self.catalog.write();
        let endpoint = if catalog.accounts.contains(id) {
            catalog.connect_account(id).map(Endpoint::Account)
        } else {
            catalog.gateways.connect(id).map(Endpoint::Gateway)
        };
        self.committed(endpoint)
    }

    pub fn disconnect_endpoint(&self, id: &str) -> Result<Endpoint> {
        let mut catalog = self.catalog.write();
        let endpoint = if catalog.accounts.contains(id) {
            catalog
                .accounts
                .set_connection(id, ConnectionState::Disconnected)
                .map(Endpoint::Account)
        } else {
            catalog.gateways.disconnect(id).map(Endpoint::Gateway)
        };
        self.committed(endpoint)
    }

    pub fn delete_endpoint(&self, id: &str) -> Result<Endpoint> {
        let mut catalog = self.catalog.write();
        let endpoint = if catalog.accounts.contains(id) {
            catalog.delete_account(id).map(Endpoint::Account)
        } else {
            catalog.delete_gateway(id).map(Endpoint::Gateway)
        };
        self.committed(endpoint)
    }

    // ---- accounts ----

    pub fn create_account(&self, spec: AccountSpec) -> Result<Account> {
        let mut catalog = self.catalog.write();
        let gateway = spec.bound_market_gateway.trim();
        if !gateway.is_empty() {
            catalog.gateways.get(gateway)?;
        }
        self.committed(catalog.accounts.create(spec))
    }

    pub fn list_accounts(&self) -> Vec<Account> {
        self.catalog.read().accounts.list()
    }

    pub fn get_account(&self, id: &str) -> Result<Account> {
        self.catalog.read().accounts.get(id).cloned()
    }

    pub fn deposit(&self, id: &str, amount: Decimal) -> Result<Account> {
        self.committed(self.catalog.write().accounts.deposit(id, amount))
    }

    pub fn withdraw(&self, id: &str, amount: Decimal) -> Result<Account> {
        self.committed(self.catalog.write().accounts.withdraw(id, amount))
    }

    pub fn connect_account(&self, id: &str) -> Result<Account> {
        self.committed(self.catalog.write().connect_account(id))
    }

    pub fn disconnect_account(&self, id: &str) -> Result<Account> {
        let account = self
            .catalog
            .write()
            .accounts
            .set_connection(id, ConnectionState::Disconnected);
        self.committed(account)
    }

    pub fn delete_account(&self, id: &str) -> Result<Account> {
        self.committed(self.catalog.write().delete_account(id))
    }

    // ---- modules ----

    /// Run a module mutation under the catalog write guard
    fn with_modules<T>(
        &self,
        op: impl FnOnce(&mut ModuleManager, &Resolver<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut catalog = self.catalog.write();
        let Catalog {
            gateways,
            accounts,
            modules,
        } = &mut *catalog;
        let resolver = Resolver {
            gateways,
            accounts,
            strategies: &self.strategies,
        };
        self.committed(op(modules, &resolver))
    }

    pub fn create_module(&self, spec: &ModuleSpec) -> Result<Module> {
        self.with_modules(|modules, resolver| {
            let module = modules.create(spec, resolver)?;
            self.ledger.open_book(&module.name);
            Ok(module)
        })
    }

    /// Replace a module's settings; `reset` also wipes its book. Without a
    /// reset the instrument may only change while the book is flat.
    pub fn update_module(&self, spec: &ModuleSpec, reset: bool) -> Result<Module> {
        self.with_modules(|modules, resolver| {
            if !reset {
                if let Ok(current) = modules.get(spec.name.trim()) {
                    let instrument = spec.subscribed_instrument.trim();
                    let open = self
                        .ledger
                        .positions(&current.name)
                        .map(|positions| !positions.is_empty())
                        .unwrap_or(false);
                    if open && instrument != current.subscribed_instrument {
                        warn!(module = %current.name, instrument, "Update rejected: positions open");
                        return Err(DeskError::Conflict(format!(
                            "Module {} holds positions in {}; close them or update with reset",
                            current.name, current.subscribed_instrument
                        )));
                    }
                }
            }
            let module = modules.update(spec, resolver)?;
            if reset {
                self.ledger.open_book(&module.name);
                self.ledger.reset(&module.name)?;
                info!(module = %module.name, "Module runtime reset");
            }
            Ok(module)
        })
    }

    pub fn set_module_enabled(&self, name: &str, enabled: bool) -> Result<Module> {
        self.with_modules(|modules, resolver| modules.set_enabled(name, enabled, resolver))
    }

    pub fn toggle_module(&self, name: &str) -> Result<Module> {
        self.with_modules(|modules, resolver| modules.toggle(name, resolver))
    }

    /// Delete a disabled module together with its positions and deals
    pub fn delete_module(&self, name: &str) -> Result<Module> {
        let mut catalog = self.catalog.write();
        let module = catalog.modules.remove(name)?;
        self.ledger.remove(name);
        self.committed(Ok(module))
    }

    pub fn list_modules(&self) -> Vec<Module> {
        self.catalog.read().modules.list()
    }

    pub fn get_module(&self, name: &str) -> Result<Module> {
        self.catalog.read().modules.get(name).cloned()
    }

    pub fn list_strategies(&self) -> Vec<String> {
        self.strategies.iter().cloned().collect()
    }

    // ---- positions & runtime ----

    pub fn apply_fill(&self, name: &str, fill: &Fill) -> Result<FillOutcome> {
        let catalog = self.catalog.read();
        let module = catalog.modules.get(name)?;
        if fill.instrument.trim() != module.subscribed_instrument {
            return Err(DeskError::Validation(format!(
                "Module {} trades {}, not {}",
                name, module.subscribed_instrument, fill.instrument
            )));
        }
        let fill = Fill {
            instrument: module.subscribed_instrument.clone(),
            ..fill.clone()
        };
        self.committed(self.ledger.apply_fill(name, &fill))
    }

    pub fn positions(&self, name: &str) -> Result<Vec<Position>> {
        let catalog = self.catalog.read();
        catalog.modules.get(name)?;
        self.ledger.positions(name)
    }

    pub fn deal_records(&self, name: &str) -> Result<Vec<DealRecord>> {
        let catalog = self.catalog.read();
        catalog.modules.get(name)?;
        self.ledger.deals(name)
    }

    pub fn runtime(&self, name: &str) -> Result<ModuleRuntime> {
        let catalog = self.catalog.read();
        let module = catalog.modules.get(name)?;
        let account = catalog.accounts.get(&module.bound_account)?.clone();

        let book = self.ledger.book(name)?;
        let book = book.lock();
        let stats = book.stats();
        let deal_count = book.deals().len();
        let avg_earning = if deal_count == 0 {
            Decimal::ZERO
        } else {
            stats.acc_close_profit / Decimal::from(deal_count)
        };
        let available_amount = module
            .allocated_capital
            .checked_add(stats.acc_close_profit)
            .ok_or_else(|| {
                DeskError::Validation(format!("Available amount of module {} overflows", name))
            })?;

        Ok(ModuleRuntime {
            module_name: module.name.clone(),
            state: module.state,
            account,
            account_runtime: ModuleAccountRuntime {
                init_balance: module.allocated_capital,
                acc_close_profit: stats.acc_close_profit,
                acc_deal_volume: stats.acc_deal_volume,
                max_profit: stats.max_profit,
                max_drawdown: stats.max_drawdown,
                available_amount,
                avg_earning,
            },
            positions: book.positions(),
        })
    }

    // ---- persistence ----

    pub fn snapshot(&self) -> DeskSnapshot {
        let catalog = self.catalog.read();
        DeskSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Some(Utc::now()),
            gateways: catalog.gateways.list(),
            accounts: catalog.accounts.list(),
            modules: catalog.modules.list(),
            books: self.ledger.export(),
        }
    }

    /// Load a snapshot into an empty desk; everything comes back offline
    pub fn restore(&self, snapshot: DeskSnapshot) -> Result<()> {
        let mut catalog = self.catalog.write();
        if !catalog.gateways.list().is_empty() || !catalog.modules.list().is_empty() {
            return Err(DeskError::Conflict("Desk already holds state".into()));
        }

        for mut gateway in snapshot.gateways {
            gateway.connection_state = ConnectionState::Disconnected;
            catalog.gateways.insert(gateway);
        }
        for mut account in snapshot.accounts {
            if !catalog.gateways.contains(&account.bound_market_gateway) {
                warn!(account = %account.id, "Restored account references a missing gateway");
            }
            account.connection_state = ConnectionState::Disconnected;
            catalog.accounts.insert(account);
        }
        for mut module in snapshot.modules {
            if !catalog.accounts.contains(&module.bound_account) {
                warn!(module = %module.name, "Skipping restored module with missing account");
                continue;
            }
            if !self.strategies.contains(&module.strategy_ref) {
                warn!(module = %module.name, strategy = %module.strategy_ref, "Restored module uses an unknown strategy");
            }
            module.enabled = false;
            module.state = ModuleState::Disabled;
            self.ledger.open_book(&module.name);
            catalog.modules.insert(module);
        }
        for book in snapshot.books {
            if catalog.modules.contains(&book.module_name) {
                self.ledger.insert(book);
            }
        }

        info!(
            gateways = catalog.gateways.list().len(),
            accounts = catalog.accounts.list().len(),
            modules = catalog.modules.list().len(),
            "Desk restored"
        );
        Ok(())
    }
}
