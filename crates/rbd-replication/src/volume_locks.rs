//! Per-volume operation locks.
//!
//! A process-wide set of volume IDs with an operation in flight. Acquisition
//! never blocks: a second caller for the same volume is told immediately
//! and is expected to retry later.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Registry of volumes that currently have a replication operation running.
#[derive(Debug, Default)]
pub struct VolumeLocks {
    held: DashMap<String, ()>,
}

impl VolumeLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `volume_id` as busy. Returns `false` if it already was.
    pub fn try_acquire(&self, volume_id: &str) -> bool {
        match self.held.entry(volume_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(());
                true
            }
        }
    }

    /// Clears the busy mark for `volume_id`.
    pub fn release(&self, volume_id: &str) {
        self.held.remove(volume_id);
    }

    /// Acquires `volume_id` and returns a guard that releases it on drop.
    pub fn lock(&self, volume_id: &str) -> Option<VolumeLockGuard<'_>> {
        if !self.try_acquire(volume_id) {
            return None;
        }
        debug!("acquired volume lock for {}", volume_id);
        Some(VolumeLockGuard {
            locks: self,
            volume_id: volume_id.to_string(),
        })
    }

    /// Returns true if `volume_id` has an operation in flight.
    pub fn is_locked(&self, volume_id: &str) -> bool {
        self.held.contains_key(volume_id)
    }

    /// Number of volumes currently held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Returns true if no volume is held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Scoped ownership of one volume lock.
#[derive(Debug)]
pub struct VolumeLockGuard<'a> {
    locks: &'a VolumeLocks,
    volume_id: String,
}

impl VolumeLockGuard<'_> {
    /// Volume this guard holds.
    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }
}

impl Drop for VolumeLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.volume_id);
        debug!("released volume lock for {}", self.volume_id);
    }
}
