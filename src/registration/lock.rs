// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Keyed mutual exclusion for registration attempts

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type Key = (String, String);
type Slots = Arc<Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>>;

/// One async mutex per `(artifact name, build id)` pair
///
/// Only serializes attempts inside this process. Two processes racing on
/// the same build still rely on the backend query being fresh. A key's slot
/// is dropped when its last holder or waiter releases it.
#[derive(Debug, Clone, Default)]
pub struct KeyedLock {
    slots: Slots,
}

/// Exclusive access to one key; released on drop
#[derive(Debug)]
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: Key,
    slots: Slots,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // the map's own reference is the only one left
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a key
    pub async fn lock(&self, artifact_name: &str, build_id: &str) -> KeyGuard {
        let key = (artifact_name.to_string(), build_id.to_string());
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        KeyGuard {
            guard: Some(slot.lock_owned().await),
            key,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of keys currently held or waited on
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
