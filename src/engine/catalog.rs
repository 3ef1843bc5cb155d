use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

use crate::engine::types::{
    PriceMap, StockRecord, TradeRejection, BUY_IMPACT, PRICE_FLOOR, REPLICATED_QUANTITY, SELL_IMPACT,
    UNLISTED_SELL_PRICE,
};

type Slot = Arc<Mutex<StockRecord>>;

/// A broker's local symbol -> record map.
///
/// The outer lock only guards membership; every record sits behind its own
/// mutex, so a read-modify-write on one symbol never blocks another symbol.
/// Entries are never removed.
#[derive(Debug)]
pub struct StockCatalog {
    owner_id: String,
    records: RwLock<HashMap<String, Slot>>,
}

impl StockCatalog {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self { owner_id: owner_id.into(), records: RwLock::new(HashMap::new()) }
    }

    pub fn with_seed(owner_id: impl Into<String>, seed: impl IntoIterator<Item = StockRecord>) -> Self {
        let catalog = Self::new(owner_id);
        {
            let mut records = catalog.records.write();
            for record in seed {
                records.insert(record.symbol.clone(), Arc::new(Mutex::new(record)));
            }
            info!(broker = %catalog.owner_id, symbols = records.len(), "Initialized stock catalog");
        }
        catalog
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.records.read().contains_key(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<StockRecord> {
        self.slot(symbol).map(|slot| slot.lock().clone())
    }

    /// Buy `qty` units. Returns the updated record, or why nothing changed.
    #[instrument(level = "debug", skip(self), fields(broker = %self.owner_id))]
    pub fn execute_buy(&self, symbol: &str, qty: u64, client_id: &str) -> Result<StockRecord, TradeRejection> {
        let Some(slot) = self.slot(symbol) else {
            let rejection = TradeRejection::UnknownSymbol { symbol: symbol.to_string() };
            warn!(error = %rejection, "Rejecting buy");
            return Err(rejection);
        };

        let mut record = slot.lock();
        if qty > record.available_quantity {
            let rejection = TradeRejection::InsufficientQuantity {
                symbol: symbol.to_string(),
                requested: qty,
                available: record.available_quantity,
            };
            warn!(error = %rejection, "Rejecting buy");
            return Err(rejection);
        }

        record.price *= 1.0 + qty as f64 * BUY_IMPACT;
        record.available_quantity -= qty;
        info!(price = record.price, remaining = record.available_quantity, "Bought");
        Ok(record.clone())
    }

    pub fn buy(&self, symbol: &str, qty: u64, client_id: &str) -> bool {
        self.execute_buy(symbol, qty, client_id).is_ok()
    }

    /// Sell `qty` units, listing the symbol first if it is unknown. Never fails.
    ///
    /// Quantity saturates at `u64::MAX` instead of overflowing.
    #[instrument(level = "debug", skip(self), fields(broker = %self.owner_id))]
    pub fn execute_sell(&self, symbol: &str, qty: u64, client_id: &str) -> StockRecord {
        let (slot, created) =
            self.slot_or_insert(symbol, || StockRecord::new(symbol, UNLISTED_SELL_PRICE, 0));
        if created {
            debug!(price = UNLISTED_SELL_PRICE, "Listed unknown symbol on sell");
        }

        let mut record = slot.lock();
        let price = (record.price * (1.0 - qty as f64 * SELL_IMPACT)).max(PRICE_FLOOR);
        let available = record.available_quantity.saturating_add(qty);
        record.price = price;
        record.available_quantity = available;
        info!(price = record.price, available = record.available_quantity, "Sold");
        record.clone()
    }

    pub fn sell(&self, symbol: &str, qty: u64, client_id: &str) -> bool {
        self.execute_sell(symbol, qty, client_id);
        true
    }

    /// Apply a point update pushed by a peer. Returns whether anything changed.
    ///
    /// The overwrite is unconditional: there is no version check, so a late
    /// push carrying an older price replaces a newer one.
    #[instrument(level = "debug", skip(self), fields(broker = %self.owner_id))]
    pub fn apply_remote_update(&self, symbol: &str, new_price: f64, source_broker_id: &str) -> bool {
        if source_broker_id == self.owner_id {
            trace!("Ignoring echo of own update");
            return false;
        }

        let (slot, created) =
            self.slot_or_insert(symbol, || StockRecord::new(symbol, new_price, REPLICATED_QUANTITY));
        if created {
            info!(price = new_price, "Added stock from peer");
        } else {
            slot.lock().price = new_price;
            info!(price = new_price, "Updated price from peer");
        }
        true
    }

    /// Merge a bulk price snapshot: unknown symbols are added, known ones only
    /// ever move up. Returns the number of records created or raised.
    ///
    /// Two brokers that both raised a price locally keep the higher one, so
    /// views can stay apart until a later point update lands.
    #[instrument(level = "debug", skip(self, prices), fields(broker = %self.owner_id, incoming = prices.len()))]
    pub fn merge_bulk(&self, prices: &PriceMap) -> usize {
        let mut changed = 0;
        for (symbol, &price) in prices {
            let (slot, created) =
                self.slot_or_insert(symbol, || StockRecord::new(symbol.as_str(), price, REPLICATED_QUANTITY));
            if created {
                changed += 1;
                continue;
            }
            let mut record = slot.lock();
            if price > record.price {
                record.price = price;
                changed += 1;
            }
        }
        info!(changed, "Merged bulk price sync");
        changed
    }

    /// Point-in-time copy of every price.
    pub fn prices(&self) -> PriceMap {
        let records = self.records.read();
        records.iter().map(|(symbol, slot)| (symbol.clone(), slot.lock().price)).collect()
    }

    /// Point-in-time copy of every record, sorted by symbol.
    pub fn records(&self) -> Vec<StockRecord> {
        let mut out: Vec<StockRecord> = {
            let records = self.records.read();
            records.values().map(|slot| slot.lock().clone()).collect()
        };
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    fn slot(&self, symbol: &str) -> Option<Slot> {
        self.records.read().get(symbol).cloned()
    }

    fn slot_or_insert(&self, symbol: &str, init: impl FnOnce() -> StockRecord) -> (Slot, bool) {
        if let Some(slot) = self.slot(symbol) {
            return (slot, false);
        }
        let mut records = self.records.write();
        // Another writer may have listed it between the two locks.
        if let Some(slot) = records.get(symbol) {
            return (slot.clone(), false);
        }
        let slot = Arc::new(Mutex::new(init()));
        records.insert(symbol.to_string(), slot.clone());
        (slot, true)
    }
}
