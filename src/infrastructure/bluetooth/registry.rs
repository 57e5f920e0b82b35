//! Discovered peer registry
//!
//! Maps peer address to its latest descriptor and owns timeout eviction.

use crate::domain::models::{DeviceDiff, PeerDescriptor, Sighting};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, PeerDescriptor>>,
    timeout: Duration,
}

impl DeviceRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn record_sighting(&self, sighting: Sighting) {
        self.record_sighting_at(sighting, Instant::now());
    }

    /// Upsert: the descriptor is replaced wholesale, stamped with `seen_at`.
    pub fn record_sighting_at(&self, sighting: Sighting, seen_at: Instant) {
        let descriptor = PeerDescriptor::from_sighting(sighting, seen_at);
        let mut devices = self.lock();
        devices.insert(descriptor.address.clone(), descriptor);
    }

    pub fn compute_diff(&self, currently_displayed: &HashSet<String>) -> DeviceDiff {
        self.compute_diff_at(currently_displayed, Instant::now())
    }

    /// Evict stale peers, then diff against `currently_displayed`.
    ///
    /// Both steps run under one lock so a concurrent sighting lands either
    /// entirely before or entirely after the diff.
    pub fn compute_diff_at(&self, currently_displayed: &HashSet<String>, now: Instant) -> DeviceDiff {
        let mut devices = self.lock();

        let timeout = self.timeout;
        devices.retain(|address, device| {
            let fresh = now.saturating_duration_since(device.last_seen) <= timeout;
            if !fresh {
                tracing::debug!(address = %address, "Evicting stale device");
            }
            fresh
        });

        let to_add = devices
            .iter()
            .filter(|(address, _)| !currently_displayed.contains(*address))
            .map(|(address, device)| (address.clone(), device.clone()))
            .collect();
        let to_remove = currently_displayed
            .iter()
            .filter(|address| !devices.contains_key(*address))
            .cloned()
            .collect();

        DeviceDiff { to_add, to_remove }
    }

    pub fn get(&self, address: &str) -> Option<PeerDescriptor> {
        self.lock().get(address).cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PeerDescriptor>> {
        // Entries are swapped whole, so a poisoned map is still consistent.
        self.devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
