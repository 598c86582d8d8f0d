//! Per-module position ledger
//!
//! Each module owns a [`ModuleBook`] guarded by its own mutex, so fills on one
//! module serialise while fills on different modules proceed in parallel.
//! Opens push lots; closes consume lots first-in-first-out and emit a
//! [`DealRecord`] per matched lot.

#[cfg(test)]
mod tests;

use crate::error::{DeskError, Result};
use crate::types::{Fill, PositionSide};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Visible net position of a module in one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub module_name: String,
    pub instrument: String,
    /// Long > 0, short < 0
    pub net_volume: i64,
    pub avg_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn side(&self) -> Option<PositionSide> {
        match self.net_volume.signum() {
            1 => Some(PositionSide::Long),
            -1 => Some(PositionSide::Short),
            _ => None,
        }
    }
}

/// Unclosed part of an opening fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    pub side: PositionSide,
    pub volume: i64,
    pub price: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// A closed round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealRecord {
    pub id: String,
    pub module_name: String,
    pub instrument: String,
    pub side: PositionSide,
    pub volume: i64,
    pub open_price: Decimal,
    pub close_price: Decimal,
    pub profit: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Running totals over a module's closed deals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookStats {
    pub acc_close_profit: Decimal,
    pub acc_deal_volume: i64,
    /// Highest cumulative close profit seen
    pub max_profit: Decimal,
    /// Largest fall from `max_profit`
    pub max_drawdown: Decimal,
}

impl BookStats {
    /// Totals after `deal`, or an error if they no longer fit
    fn with_deal(&self, deal: &DealRecord) -> Result<BookStats> {
        let acc_close_profit = self
            .acc_close_profit
            .checked_add(deal.profit)
            .ok_or_else(|| overflow("Accumulated close profit"))?;
        let acc_deal_volume = self
            .acc_deal_volume
            .checked_add(deal.volume)
            .ok_or_else(|| overflow("Accumulated deal volume"))?;
        let max_profit = self.max_profit.max(acc_close_profit);
        let drawdown = max_profit
            .checked_sub(acc_close_profit)
            .ok_or_else(|| overflow("Drawdown"))?;
        Ok(BookStats {
            acc_close_profit,
            acc_deal_volume,
            max_profit,
            max_drawdown: self.max_drawdown.max(drawdown),
        })
    }
}

fn overflow(what: &str) -> DeskError {
    DeskError::Validation(format!("{} overflows", what))
}

/// Result of applying a single fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillOutcome {
    /// Position after the fill, `None` once flat
    pub position: Option<Position>,
    pub deals: Vec<DealRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleBook {
    pub module_name: String,
    positions: BTreeMap<String, Position>,
    lots: BTreeMap<String, VecDeque<Lot>>,
    deals: Vec<DealRecord>,
    stats: BookStats,
}

impl ModuleBook {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            ..Default::default()
        }
    }

    pub fn apply(&mut self, fill: &Fill) -> Result<FillOutcome> {
        if fill.volume <= 0 {
            return Err(DeskError::Validation(format!(
                "Fill volume must be positive, got {}",
                fill.volume
            )));
        }
        if fill.price <= Decimal::ZERO {
            return Err(DeskError::Validation(format!(
                "Fill price must be positive, got {}",
                fill.price
            )));
        }

        let current = self
            .positions
            .get(&fill.instrument)
            .map(|p| p.net_volume)
            .unwrap_or(0);
        let side = fill.direction.side();
        let now = Utc::now();

        let deals = if fill.direction.is_open() {
            if current != 0 && current.signum() != side.sign() {
                return Err(DeskError::Validation(format!(
                    "Cannot {} {} while holding the opposite side ({})",
                    fill.direction, fill.instrument, current
                )));
            }
            self.open(fill, current, now)?;
            Vec::new()
        } else {
            let held = if current.signum() == side.sign() { current.abs() } else { 0 };
            if held == 0 {
                return Err(DeskError::Validation(format!(
                    "No {:?} position in {} to close",
                    side, fill.instrument
                )));
            }
            if fill.volume > held {
                return Err(DeskError::Validation(format!(
                    "Close volume {} exceeds open volume {} in {}",
                    fill.volume, held, fill.instrument
                )));
            }
            self.close(fill, current, now)?
        };

        let position = self.positions.get(&fill.instrument).cloned();
        debug!(
            module = %self.module_name,
            instrument = %fill.instrument,
            direction = %fill.direction,
            volume = fill.volume,
            net = position.as_ref().map(|p| p.net_volume).unwrap_or(0),
            "Fill applied"
        );
        Ok(FillOutcome { position, deals })
    }

    fn open(&mut self, fill: &Fill, current: i64, now: DateTime<Utc>) -> Result<()> {
        // magnitude must stay representable, so i64::MIN is out
        let net_volume = current
            .checked_add(fill.direction.signed_delta(fill.volume))
            .filter(|net| net.checked_abs().is_some())
            .ok_or_else(|| overflow("Position volume"))?;

        let avg_price = match self.positions.get(&fill.instrument) {
            Some(p) => {
                let held = Decimal::from(current.abs());
                let added = Decimal::from(fill.volume);
                p.avg_price
                    .checked_mul(held)
                    .zip(fill.price.checked_mul(added))
                    .and_then(|(a, b)| a.checked_add(b))
                    .zip(held.checked_add(added))
                    .and_then(|(notional, volume)| notional.checked_div(volume))
                    .ok_or_else(|| overflow("Average price"))?
            }
            None => fill.price,
        };

        self.positions.insert(
            fill.instrument.clone(),
            Position {
                module_name: self.module_name.clone(),
                instrument: fill.instrument.clone(),
                net_volume,
                avg_price,
                updated_at: now,
            },
        );
        self.lots
            .entry(fill.instrument.clone())
            .or_default()
            .push_back(Lot {
                side: fill.direction.side(),
                volume: fill.volume,
                price: fill.price,
                opened_at: now,
            });
        Ok(())
    }

    /// Volume was checked against the open magnitude by the caller. Deals and
    /// totals are computed before any lot is consumed, so a failure leaves the
    /// book untouched.
    fn close(&mut self, fill: &Fill, current: i64, now: DateTime<Utc>) -> Result<Vec<DealRecord>> {
        let side = fill.direction.side();
        let mut deals = Vec::new();
        let mut stats = self.stats.clone();
        let mut remaining = fill.volume;

        for lot in self.lots.get(&fill.instrument).into_iter().flatten() {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(lot.volume);
            let diff = match side {
                PositionSide::Long => fill.price.checked_sub(lot.price),
                PositionSide::Short => lot.price.checked_sub(fill.price),
            };
            let profit = diff
                .and_then(|d| d.checked_mul(Decimal::from(take)))
                .ok_or_else(|| overflow("Deal profit"))?;
            let deal = DealRecord {
                id: uuid::Uuid::new_v4().to_string(),
                module_name: self.module_name.clone(),
                instrument: fill.instrument.clone(),
                side,
                volume: take,
                open_price: lot.price,
                close_price: fill.price,
                profit,
                opened_at: lot.opened_at,
                closed_at: now,
            };
            stats = stats.with_deal(&deal)?;
            deals.push(deal);
            remaining -= take;
        }
        let net_volume = current
            .checked_add(fill.direction.signed_delta(fill.volume))
            .ok_or_else(|| overflow("Position volume"))?;

        if let Some(lots) = self.lots.get_mut(&fill.instrument) {
            for deal in &deals {
                if let Some(lot) = lots.front_mut() {
                    lot.volume -= deal.volume;
                    if lot.volume == 0 {
                        lots.pop_front();
                    }
                }
            }
        }
        self.stats = stats;
        self.deals.extend(deals.iter().cloned());

        if net_volume == 0 {
            self.positions.remove(&fill.instrument);
            self.lots.remove(&fill.instrument);
        } else if let Some(p) = self.positions.get_mut(&fill.instrument) {
            p.net_volume = net_volume;
            p.updated_at = now;
        }
        Ok(deals)
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn deals(&self) -> &[DealRecord] {
        &self.deals
    }

    pub fn stats(&self) -> &BookStats {
        &self.stats
    }

    /// Drop positions, lots, deals and stats
    pub fn reset(&mut self) {
        self.positions.clear();
        self.lots.clear();
        self.deals.clear();
        self.stats = BookStats::default();
    }
}

/// All module books, each independently lockable
#[derive(Debug, Default)]
pub struct PositionLedger {
    books: RwLock<HashMap<String, Arc<Mutex<ModuleBook>>>>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty book unless one already exists
    pub fn open_book(&self, module_name: &str) {
        self.books
            .write()
            .entry(module_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ModuleBook::new(module_name))));
    }

    pub fn book(&self, module_name: &str) -> Result<Arc<Mutex<ModuleBook>>> {
        self.books
            .read()
            .get(module_name)
            .cloned()
            .ok_or_else(|| DeskError::NotFound(format!("Position book for module {}", module_name)))
    }

    pub fn apply_fill(&self, module_name: &str, fill: &Fill) -> Result<FillOutcome> {
        let book = self.book(module_name)?;
        let mut book = book.lock();
        book.apply(fill)
    }

    pub fn positions(&self, module_name: &str) -> Result<Vec<Position>> {
        Ok(self.book(module_name)?.lock().positions())
    }

    pub fn deals(&self, module_name: &str) -> Result<Vec<DealRecord>> {
        Ok(self.book(module_name)?.lock().deals().to_vec())
    }

    pub fn reset(&self, module_name: &str) -> Result<()> {
        self.book(module_name)?.lock().reset();
        Ok(())
    }

    pub fn remove(&self, module_name: &str) {
        self.books.write().remove(module_name);
    }

    /// Copies of every book, sorted by module name
    pub fn export(&self) -> Vec<ModuleBook> {
        let mut books: Vec<ModuleBook> = self
            .books
            .read()
            .values()
            .map(|b| b.lock().clone())
            .collect();
        books.sort_by(|a, b| a.module_name.cmp(&b.module_name));
        books
    }

    pub(crate) fn insert(&self, book: ModuleBook) {
        self.books
            .write()
            .insert(book.module_name.clone(), Arc::new(Mutex::new(book)));
    }
}
