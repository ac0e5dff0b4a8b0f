//! In-process backend.
//!
//! Holds every table behind one mutex. Each query takes the lock once, so a
//! conditional update here is as atomic as its `UPDATE ... WHERE` twin in
//! Postgres. Used by the `memory` backend mode and by the test suites.

use super::delivery::Delivery;
use super::delivery_partner::DeliveryPartner;
use super::delivery_tracking::{DeliveryStatusEntry, LocationSample};
use super::notification::{Notification, PushToken};
use super::order::{Order, OrderItem};
use super::store::Store;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
}

#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub stores: BTreeMap<i32, Store>,
    pub orders: BTreeMap<i32, Order>,
    pub order_items: BTreeMap<i32, OrderItem>,
    pub deliveries: BTreeMap<i32, Delivery>,
    pub status_history: BTreeMap<i32, DeliveryStatusEntry>,
    pub location_trail: BTreeMap<i64, LocationSample>,
    pub partners: BTreeMap<i32, DeliveryPartner>,
    pub notifications: BTreeMap<i32, Notification>,
    pub push_tokens: BTreeMap<i32, PushToken>,
    sequences: HashMap<&'static str, i64>,
}

impl Tables {
    /// Next value of the serial column of `table`, starting at 1 like Postgres.
    pub fn next_id(&mut self, table: &'static str) -> i64 {
        let value = self.sequences.entry(table).or_insert(0);
        *value += 1;
        *value
    }

    pub fn next_serial(&mut self, table: &'static str) -> i32 {
        i32::try_from(self.next_id(table)).unwrap_or(i32::MAX)
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock()
    }

    /// Make the next row of `table` get `next` as its id.
    pub fn restart_sequence(&self, table: &'static str, next: i64) {
        self.tables().sequences.insert(table, next - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_per_table() {
        let db = MemoryDatabase::new();
        let mut tables = db.tables();
        assert_eq!(tables.next_serial("orders"), 1);
        assert_eq!(tables.next_serial("orders"), 2);
        assert_eq!(tables.next_serial("deliveries"), 1);
    }

    #[test]
    fn restarted_sequence_hands_out_requested_id() {
        let db = MemoryDatabase::new();
        db.restart_sequence("orders", 100);
        assert_eq!(db.tables().next_serial("orders"), 100);
        assert_eq!(db.tables().next_serial("orders"), 101);
    }
}
