//! Named, capacity-tracked event locks and their id allocator.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use super::session::SessionId;

/// Ids below this are protocol sentinels and never handed out.
pub const RESERVED_SEMAPHORE_IDS: u32 = 7;

const RAVIENTE_PREFIX: &str = "hs_l0u3B5";
const RAVIENTE_SUFFIX: &str = "3";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SemaphoreError {
    #[error("semaphore not found: {0}")]
    NotFound(String),

    #[error("semaphore full: {name} ({max_players} players)")]
    Full { name: String, max_players: u16 },
}

#[derive(Debug, Clone)]
pub struct Semaphore {
    pub name: String,
    pub id: u32,
    pub max_players: u16,
    clients: HashSet<SessionId>,
}

impl Semaphore {
    pub fn occupancy(&self) -> usize {
        self.clients.len()
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.clients.contains(&session)
    }

    fn is_raviente(&self) -> bool {
        self.name.starts_with(RAVIENTE_PREFIX) && self.name.ends_with(RAVIENTE_SUFFIX)
    }
}

#[derive(Debug)]
struct Inner {
    semaphores: HashMap<String, Semaphore>,
    cursor: u32,
}

impl Inner {
    /// Advance the cursor until it lands on an id no live semaphore holds.
    fn next_id(&mut self) -> u32 {
        loop {
            self.cursor = self.cursor.wrapping_add(1);
            if self.cursor == 0 {
                self.cursor = RESERVED_SEMAPHORE_IDS;
            }
            let cursor = self.cursor;
            if !self.semaphores.values().any(|s| s.id == cursor) {
                return cursor;
            }
        }
    }
}

#[derive(Debug)]
pub struct SemaphoreRegistry {
    inner: Mutex<Inner>,
}

impl SemaphoreRegistry {
    pub fn new() -> Self {
        Self::with_cursor(RESERVED_SEMAPHORE_IDS)
    }

    /// Registry whose next allocation is `cursor + 1`.
    pub fn with_cursor(cursor: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                semaphores: HashMap::new(),
                cursor: cursor.max(RESERVED_SEMAPHORE_IDS),
            }),
        }
    }

    pub async fn next_id(&self) -> u32 {
        self.inner.lock().await.next_id()
    }

    /// Create a semaphore, or return the id of the existing one with `name`.
    pub async fn create(&self, name: &str, max_players: u16) -> u32 {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.semaphores.get(name) {
            return existing.id;
        }
        let id = inner.next_id();
        inner.semaphores.insert(
            name.to_string(),
            Semaphore {
                name: name.to_string(),
                id,
                max_players,
                clients: HashSet::new(),
            },
        );
        tracing::debug!("[channel] [semaphore_create] name={} id={}", name, id);
        id
    }

    /// Join `session` to the named semaphore. Returns the new occupancy.
    pub async fn join(&self, name: &str, session: SessionId) -> Result<usize, SemaphoreError> {
        let mut inner = self.inner.lock().await;
        let sema = inner
            .semaphores
            .get_mut(name)
            .ok_or_else(|| SemaphoreError::NotFound(name.to_string()))?;
        if !sema.clients.contains(&session) && sema.clients.len() >= sema.max_players as usize {
            return Err(SemaphoreError::Full {
                name: name.to_string(),
                max_players: sema.max_players,
            });
        }
        sema.clients.insert(session);
        Ok(sema.clients.len())
    }

    pub async fn leave(&self, name: &str, session: SessionId) -> bool {
        let mut inner = self.inner.lock().await;
        inner
            .semaphores
            .get_mut(name)
            .map(|s| s.clients.remove(&session))
            .unwrap_or(false)
    }

    /// Drop `session` from every semaphore it joined.
    pub async fn remove_session(&self, session: SessionId) {
        let mut inner = self.inner.lock().await;
        for sema in inner.semaphores.values_mut() {
            sema.clients.remove(&session);
        }
    }

    pub async fn remove(&self, name: &str) -> Option<Semaphore> {
        self.inner.lock().await.semaphores.remove(name)
    }

    pub async fn get(&self, name: &str) -> Option<Semaphore> {
        self.inner.lock().await.semaphores.get(name).cloned()
    }

    pub async fn occupancy(&self, name: &str) -> Option<usize> {
        self.inner.lock().await.semaphores.get(name).map(Semaphore::occupancy)
    }

    /// Occupancy of the live Raviente semaphore, if any.
    pub async fn raviente_occupancy(&self) -> Option<usize> {
        let inner = self.inner.lock().await;
        inner
            .semaphores
            .values()
            .find(|s| s.is_raviente())
            .map(Semaphore::occupancy)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.semaphores.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.semaphores.is_empty()
    }
}

impl Default for SemaphoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}
