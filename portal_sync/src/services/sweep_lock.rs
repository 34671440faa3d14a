//! Serializes discovery sweeps per (project, credential) pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct SweepLocks {
    locks: Mutex<HashMap<(Uuid, Uuid), Arc<AsyncMutex<()>>>>,
}

impl SweepLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other sweep holds this pair, then hold it until the
    /// guard is dropped.
    pub async fn acquire(&self, project_id: Uuid, secret_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry((project_id, secret_id))
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
