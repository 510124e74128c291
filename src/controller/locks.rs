use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// One async lock per managed service
///
/// A mutating action holds its service's guard across the whole
/// read-decide-apply-persist sequence, so two promotions can never read
/// the same stage.
#[derive(Clone, Default)]
pub struct ServiceLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ServiceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, service: &str) -> OwnedMutexGuard<()> {
        let lock = {
            // A poisoned map still holds valid locks
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(service.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
