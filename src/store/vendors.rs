use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use uuid::Uuid;

use crate::models::vendor::Vendor;

/// Vendor locations and service radii, enumerated in registration order.
#[derive(Default)]
pub struct VendorRegistry {
    vendors: DashMap<Uuid, (u64, Vendor)>,
    next_seq: AtomicU64,
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a vendor. Replacing keeps the original position in
    /// the enumeration order.
    pub fn upsert(&self, vendor: Vendor) {
        let seq = self
            .vendors
            .get(&vendor.id)
            .map(|entry| entry.value().0)
            .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::Relaxed));
        self.vendors.insert(vendor.id, (seq, vendor));
    }

    pub fn get(&self, id: Uuid) -> Option<Vendor> {
        self.vendors.get(&id).map(|entry| entry.value().1.clone())
    }

    pub fn active(&self) -> Vec<Vendor> {
        let mut vendors: Vec<(u64, Vendor)> = self
            .vendors
            .iter()
            .filter(|entry| entry.value().1.active)
            .map(|entry| entry.value().clone())
            .collect();
        vendors.sort_by_key(|(seq, _)| *seq);
        vendors.into_iter().map(|(_, vendor)| vendor).collect()
    }

    pub fn len(&self) -> usize {
        self.vendors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }
}
