//! The single owned session slot.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::Session;
use crate::persist::{PersistenceSink, PersistenceWriter};

#[derive(Default)]
struct Slot {
    current: Option<Arc<Session>>,
    last_generation: u64,
}

/// Holds the current [`Session`].
///
/// Readers get an `Arc` to an immutable session, so access and refresh
/// tokens always come from the same generation. Writers hold the lock only
/// for the pointer swap and for queueing the matching persistence command,
/// which keeps the persisted order identical to the in-memory order. The
/// write itself runs on a background writer.
pub struct CredentialStore {
    slot: RwLock<Slot>,
    writer: Option<PersistenceWriter>,
}

impl CredentialStore {
    /// In-memory store with no persistence
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot::default()),
            writer: None,
        }
    }

    /// Store that mirrors every change to `sink` (best-effort)
    pub fn with_persistence(sink: Arc<dyn PersistenceSink>) -> Self {
        Self {
            slot: RwLock::new(Slot::default()),
            writer: Some(PersistenceWriter::spawn(sink)),
        }
    }

    pub fn get(&self) -> Option<Arc<Session>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// Install `session` unconditionally, returning the stored value
    pub fn replace(&self, session: Session) -> Arc<Session> {
        let stored = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            let stored = Self::install(&mut slot, session);
            self.persist_save(&stored);
            stored
        };
        debug!(generation = stored.generation, "Session replaced");
        stored
    }

    /// Install `session` only if the current session is still generation
    /// `expected`. Returns `None` when another writer got there first.
    pub fn replace_if_current(&self, expected: u64, session: Session) -> Option<Arc<Session>> {
        let stored = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            if Self::current_generation(&slot) != Some(expected) {
                return None;
            }
            let stored = Self::install(&mut slot, session);
            self.persist_save(&stored);
            stored
        };
        debug!(generation = stored.generation, replaced = expected, "Session replaced");
        Some(stored)
    }

    /// Remove the session, returning what was there
    pub fn clear(&self) -> Option<Arc<Session>> {
        let previous = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            self.persist_clear();
            slot.current.take()
        };
        if let Some(ref prev) = previous {
            debug!(generation = prev.generation, "Session cleared");
        }
        previous
    }

    /// Remove the session only if it is still generation `expected`
    pub fn clear_if_current(&self, expected: u64) -> bool {
        {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            if Self::current_generation(&slot) != Some(expected) {
                return false;
            }
            slot.current = None;
            self.persist_clear();
        }
        debug!(generation = expected, "Session cleared");
        true
    }

    /// Record a successful remote validation without changing generation,
    /// so an in-flight refresh of the same credential still applies.
    pub fn mark_validated(&self, expected: u64, at: DateTime<Utc>) -> bool {
        {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            let Some(current) = slot.current.as_ref() else {
                return false;
            };
            if current.generation != expected {
                return false;
            }
            let mut updated = Session::clone(current);
            updated.last_validated_at = Some(at);
            let updated = Arc::new(updated);
            slot.current = Some(Arc::clone(&updated));
            self.persist_save(&updated);
        }
        true
    }

    /// Install a session loaded from persistence without writing it back
    pub fn restore(&self, session: Session) -> Arc<Session> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        Self::install(&mut slot, session)
    }

    /// Wait until every queued persistence write has been applied
    pub async fn flush(&self) {
        if let Some(ref writer) = self.writer {
            writer.flush().await;
        }
    }

    fn install(slot: &mut Slot, mut session: Session) -> Arc<Session> {
        slot.last_generation += 1;
        session.generation = slot.last_generation;
        let session = Arc::new(session);
        slot.current = Some(Arc::clone(&session));
        session
    }

    fn current_generation(slot: &Slot) -> Option<u64> {
        slot.current.as_ref().map(|s| s.generation)
    }

    fn persist_save(&self, session: &Arc<Session>) {
        if let Some(ref writer) = self.writer {
            writer.save(Arc::clone(session));
        }
    }

    fn persist_clear(&self) {
        if let Some(ref writer) = self.writer {
            writer.clear();
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credential;
    use crate::testing::MemorySink;
    use chrono::Duration;
    use std::thread;

    fn session(generation_tag: u64) -> Session {
        let now = Utc::now();
        Session::new(
            Credential::new(
                format!("access-{}", generation_tag),
                now + Duration::minutes(15),
                Some(format!("refresh-{}", generation_tag)),
                now + Duration::hours(1),
            ),
            "user-1",
        )
    }

    #[test]
    fn test_replace_assigns_increasing_generations() {
        let store = CredentialStore::new();
        assert!(store.get().is_none());

        let first = store.replace(session(1));
        let second = store.replace(session(2));
        assert!(second.generation() > first.generation());
        assert_eq!(store.get().map(|s| s.generation()), Some(second.generation()));
    }

    #[test]
    fn test_replace_if_current_rejects_stale_generation() {
        let store = CredentialStore::new();
        let first = store.replace(session(1));
        let second = store.replace(session(2));

        assert!(store.replace_if_current(first.generation(), session(3)).is_none());
        let third = store
            .replace_if_current(second.generation(), session(3))
            .expect("current generation matches");
        assert_eq!(third.credential.access_token(), "access-3");
    }

    #[test]
    fn test_clear_if_current_leaves_newer_session() {
        let store = CredentialStore::new();
        let first = store.replace(session(1));
        store.replace(session(2));

        assert!(!store.clear_if_current(first.generation()));
        assert!(store.get().is_some());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = CredentialStore::new();
        assert!(store.clear().is_none());
        store.replace(session(1));
        assert!(store.clear().is_some());
        assert!(store.clear().is_none());
    }

    #[test]
    fn test_mark_validated_keeps_generation() {
        let store = CredentialStore::new();
        let stored = store.replace(session(1));
        let at = Utc::now();

        assert!(store.mark_validated(stored.generation(), at));
        let current = store.get().expect("session present");
        assert_eq!(current.generation(), stored.generation());
        assert_eq!(current.last_validated_at, Some(at));

        assert!(!store.mark_validated(stored.generation() + 1, at));
    }

    #[test]
    fn test_concurrent_readers_never_observe_torn_session() {
        let store = Arc::new(CredentialStore::new());
        store.replace(session(0));

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 1..=2_000 {
                    store.replace(session(i));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..5_000 {
                        if let Some(s) = store.get() {
                            let access = s.credential.access_token().trim_start_matches("access-");
                            let refresh = s
                                .credential
                                .refresh_token()
                                .unwrap_or_default()
                                .trim_start_matches("refresh-");
                            assert_eq!(access, refresh);
                        }
                    }
                })
            })
            .collect();

        writer.join().expect("writer thread");
        for reader in readers {
            reader.join().expect("reader thread");
        }
    }

    #[tokio::test]
    async fn test_persistence_applies_writes_in_order() {
        let sink = Arc::new(MemorySink::default());
        let store = CredentialStore::with_persistence(sink.clone());

        store.replace(session(1));
        store.replace(session(2));
        store.flush().await;
        assert_eq!(
            sink.current().map(|s| s.credential.access_token().to_string()),
            Some("access-2".to_string())
        );

        store.clear();
        store.flush().await;
        assert!(sink.current().is_none());
        assert_eq!(sink.saves(), 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_affect_memory() {
        let sink = Arc::new(MemorySink::failing());
        let store = CredentialStore::with_persistence(sink);

        store.replace(session(1));
        store.flush().await;
        assert!(store.get().is_some());
    }

    #[tokio::test]
    async fn test_restore_does_not_write_back() {
        let sink = Arc::new(MemorySink::default());
        let store = CredentialStore::with_persistence(sink.clone());

        let restored = store.restore(session(7));
        store.flush().await;
        assert_eq!(restored.generation(), 1);
        assert_eq!(sink.saves(), 0);
    }
}
