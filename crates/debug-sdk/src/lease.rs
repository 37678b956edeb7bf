use std::collections::HashSet;
use std::sync::Arc;

use havoc_debug_proto::SessionKey;
use parking_lot::Mutex;

use crate::error::DebugError;

/// Keys of the sessions a client currently holds open.
#[derive(Clone, Default)]
pub(crate) struct LeaseTable {
    held: Arc<Mutex<HashSet<SessionKey>>>,
}

impl LeaseTable {
    pub(crate) fn acquire(&self, key: &SessionKey) -> Result<SessionLease, DebugError> {
        let mut held = self.held.lock();
        if !held.insert(key.clone()) {
            return Err(DebugError::SessionAlreadyOpen(key.clone()));
        }
        Ok(SessionLease {
            key: key.clone(),
            held: Arc::clone(&self.held),
        })
    }

    pub(crate) fn is_held(&self, key: &SessionKey) -> bool {
        self.held.lock().contains(key)
    }
}

/// Released when dropped.
pub(crate) struct SessionLease {
    key: SessionKey,
    held: Arc<Mutex<HashSet<SessionKey>>>,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.held.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_lease_per_key_until_released() {
        let table = LeaseTable::default();
        let key = SessionKey::new("demo", 1, "clean_exit");
        let lease = table.acquire(&key).unwrap();
        assert!(matches!(
            table.acquire(&key),
            Err(DebugError::SessionAlreadyOpen(held)) if held == key
        ));
        assert!(table
            .acquire(&SessionKey::new("demo", 1, "short_input"))
            .is_ok());
        drop(lease);
        assert!(!table.is_held(&key));
        assert!(table.acquire(&key).is_ok());
    }
}
