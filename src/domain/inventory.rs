//! In-memory inventory ledger (§3, §4.4 `reserve`/`release`).

use parking_lot::Mutex;
use std::collections::HashMap;

/// Large enough to behave as "effectively unlimited" for any product the
/// seed data doesn't know about (§3).
const UNSEEDED_SENTINEL: i64 = 1_000_000;

#[derive(Default)]
pub struct InventoryLedger {
    units: Mutex<HashMap<String, i64>>,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(stock: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self {
            units: Mutex::new(stock.into_iter().collect()),
        }
    }

    fn on_hand_locked(map: &HashMap<String, i64>, product_id: &str) -> i64 {
        *map.get(product_id).unwrap_or(&UNSEEDED_SENTINEL)
    }

    pub fn on_hand(&self, product_id: &str) -> i64 {
        Self::on_hand_locked(&self.units.lock(), product_id)
    }

    /// Reserve every item atomically: if any item in the batch can't be
    /// fully reserved, roll back the partial decrements made earlier in the
    /// same call before returning the failing product id (§4.4 `reserve`).
    pub fn reserve_batch(&self, items: &[(String, u32)]) -> Result<(), String> {
        let mut map = self.units.lock();
        let mut applied: Vec<(&str, i64)> = Vec::with_capacity(items.len());

        for (product_id, quantity) in items {
            let want = *quantity as i64;
            let have = Self::on_hand_locked(&map, product_id);
            if have < want {
                for (id, qty) in applied {
                    *map.entry(id.to_string()).or_insert(UNSEEDED_SENTINEL) += qty;
                }
                return Err(product_id.clone());
            }
            *map.entry(product_id.clone()).or_insert(UNSEEDED_SENTINEL) -= want;
            applied.push((product_id.as_str(), want));
        }
        Ok(())
    }

    pub fn release_batch(&self, items: &[(String, u32)]) {
        let mut map = self.units.lock();
        for (product_id, quantity) in items {
            *map.entry(product_id.clone()).or_insert(UNSEEDED_SENTINEL) += *quantity as i64;
        }
    }
}
