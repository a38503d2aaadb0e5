use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-key async locks. Only callers asking for the same key wait on each
/// other; a slot disappears once nobody holds or awaits it.
#[derive(Clone, Default)]
pub(crate) struct InFlight {
    slots: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

impl InFlight {
    pub(crate) async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slots.retain(|_, slot| slot.strong_count() > 0);

            match slots.get(key).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(AsyncMutex::new(()));
                    slots.insert(key.to_string(), Arc::downgrade(&slot));
                    slot
                }
            }
        };

        slot.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) fn live_slots(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| slots.values().filter(|s| s.strong_count() > 0).count())
            .unwrap_or(0)
    }
}
