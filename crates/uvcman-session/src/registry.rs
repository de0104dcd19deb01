//! Registry of tracked device sessions

use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uvcman_core::DeviceId;

use crate::session::{DeviceSession, SessionSnapshot};

/// A registered session plus the locks that serialize work on it.
///
/// `sequence()` is held for the whole handling of one event so events for the
/// same device run in order. It is reentrant, so callbacks running inside an
/// event may call back into the coordinator. `lock()` guards the session data
/// and is only held for short sections, never across driver calls or
/// application callbacks.
pub struct SessionEntry {
    id: DeviceId,
    sequencer: ReentrantMutex<()>,
    session: Mutex<DeviceSession>,
}

impl SessionEntry {
    fn new(session: DeviceSession) -> Self {
        Self {
            id: session.device().id().clone(),
            sequencer: ReentrantMutex::new(()),
            session: Mutex::new(session),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn sequence(&self) -> ReentrantMutexGuard<'_, ()> {
        self.sequencer.lock()
    }

    pub fn lock(&self) -> MutexGuard<'_, DeviceSession> {
        self.session.lock()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().snapshot()
    }
}

pub type SharedSession = Arc<SessionEntry>;

/// Device identifier → session map. At most one session per identifier.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<DeviceId, SharedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `id`, creating it with `factory` if absent.
    ///
    /// The factory runs under the registry write lock, so concurrent attach
    /// notifications for one device cannot create two sessions. When the
    /// factory fails nothing is inserted. The flag is true for a new session.
    pub fn get_or_create<F, E>(&self, id: &DeviceId, factory: F) -> Result<(SharedSession, bool), E>
    where
        F: FnOnce(&DeviceId) -> Result<DeviceSession, E>,
    {
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(id) {
            return Ok((existing.clone(), false));
        }

        let entry = Arc::new(SessionEntry::new(factory(id)?));
        sessions.insert(id.clone(), entry.clone());
        info!(device = %id, total = sessions.len(), "Session created");
        Ok((entry, true))
    }

    pub fn get(&self, id: &DeviceId) -> Option<SharedSession> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove and return the session for `id`; `None` if it was not tracked
    pub fn remove(&self, id: &DeviceId) -> Option<SharedSession> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            info!(device = %id, "Session removed from registry");
        }
        removed
    }

    /// Remove `id` only while it still maps to `entry`, so a stale handler
    /// cannot drop a session created after it looked the device up
    pub fn remove_entry(&self, id: &DeviceId, entry: &SharedSession) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(id) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                sessions.remove(id);
                info!(device = %id, "Session removed from registry");
                true
            }
            _ => {
                debug!(device = %id, "Session already replaced or removed");
                false
            }
        }
    }

    /// Apply `f` to a snapshot of the current sessions. The registry lock is
    /// released before `f` runs, so `f` may add or remove sessions.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&SharedSession),
    {
        let snapshot: Vec<SharedSession> = self.sessions.read().values().cloned().collect();
        for entry in &snapshot {
            f(entry);
        }
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
