//! Persisted user and device identity.

use crate::storage::StorageAdapter;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub(crate) const ANON_ID_KEY: &str = "anon_id";
pub(crate) const USER_ID_KEY: &str = "user_id";

/// Identity stamped onto every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Identity {
    pub anonymous_id: String,
    pub user_id: Option<String>,
}

#[derive(Debug)]
pub(crate) struct IdentityStore {
    storage: Arc<dyn StorageAdapter>,
    current: Mutex<Identity>,
}

impl IdentityStore {
    /// Restore identity from storage, minting an anonymous id on first use.
    pub(crate) fn load(storage: Arc<dyn StorageAdapter>) -> Self {
        let anonymous_id = match storage.get::<String>(ANON_ID_KEY) {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = new_anonymous_id();
                storage.set(ANON_ID_KEY, &id);
                id
            }
        };
        let user_id = storage
            .get::<String>(USER_ID_KEY)
            .filter(|id| !id.is_empty());

        Self {
            storage,
            current: Mutex::new(Identity {
                anonymous_id,
                user_id,
            }),
        }
    }

    pub(crate) fn current(&self) -> Identity {
        self.lock().clone()
    }

    pub(crate) fn set_user_id(&self, user_id: String) {
        let mut current = self.lock();
        self.storage.set(USER_ID_KEY, &user_id);
        current.user_id = Some(user_id);
    }

    /// Forget the user and start a new anonymous identity.
    pub(crate) fn reset(&self) {
        let mut current = self.lock();
        let anonymous_id = new_anonymous_id();

        self.storage.remove(USER_ID_KEY);
        self.storage.set(ANON_ID_KEY, &anonymous_id);

        *current = Identity {
            anonymous_id,
            user_id: None,
        };
    }

    fn lock(&self) -> MutexGuard<'_, Identity> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn new_anonymous_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn memory() -> Arc<dyn StorageAdapter> {
        Arc::new(MemoryStorage::new("gamify_"))
    }

    #[test]
    fn test_anonymous_id_is_minted_and_persisted() {
        let storage = memory();
        let store = IdentityStore::load(storage.clone());

        let identity = store.current();
        assert!(!identity.anonymous_id.is_empty());
        assert_eq!(identity.user_id, None);
        assert_eq!(
            storage.get::<String>(ANON_ID_KEY),
            Some(identity.anonymous_id)
        );
    }

    #[test]
    fn test_identity_survives_reload() {
        let storage = memory();
        let first = IdentityStore::load(storage.clone());
        first.set_user_id("usr_1".into());
        let before = first.current();

        let second = IdentityStore::load(storage);
        assert_eq!(second.current(), before);
        assert_eq!(second.current().user_id.as_deref(), Some("usr_1"));
    }

    #[test]
    fn test_reset_clears_user_and_rotates_anonymous_id() {
        let storage = memory();
        let store = IdentityStore::load(storage.clone());
        store.set_user_id("usr_1".into());
        let before = store.current();

        store.reset();

        let after = store.current();
        assert_eq!(after.user_id, None);
        assert_ne!(after.anonymous_id, before.anonymous_id);
        assert_eq!(storage.get::<String>(USER_ID_KEY), None);
        assert_eq!(storage.get::<String>(ANON_ID_KEY), Some(after.anonymous_id));
    }
}
