//! Exclusive checkout of remote sessions.
//!
//! A transport session is not safe for concurrent use. The pool hands out one
//! [`SessionGuard`] per session; with a single session every remote call in
//! the process is serialized.

use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use hpcrag_core::{Error, RemoteTransport, Result};

type Slot = Arc<Mutex<Arc<dyn RemoteTransport>>>;

/// Fixed set of transports, each usable by one holder at a time.
#[derive(Clone)]
pub struct SessionPool {
    slots: Arc<Vec<Slot>>,
    permits: Arc<Semaphore>,
}

/// Exclusive access to one session until dropped.
pub struct SessionGuard {
    // Field order matters: the slot lock is released before the permit, so a
    // free permit always implies a free slot.
    session: OwnedMutexGuard<Arc<dyn RemoteTransport>>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for SessionGuard {
    type Target = dyn RemoteTransport;

    fn deref(&self) -> &Self::Target {
        &**self.session
    }
}

impl SessionPool {
    pub fn new(sessions: Vec<Arc<dyn RemoteTransport>>) -> Result<Self> {
        if sessions.is_empty() {
            return Err(Error::Config(
                "session pool needs at least one transport".to_string(),
            ));
        }
        let permits = Arc::new(Semaphore::new(sessions.len()));
        let slots = sessions
            .into_iter()
            .map(|s| Arc::new(Mutex::new(s)))
            .collect();
        Ok(Self {
            slots: Arc::new(slots),
            permits,
        })
    }

    /// Pool over a single session; all remote calls are mutually exclusive.
    pub fn single(session: Arc<dyn RemoteTransport>) -> Self {
        let slot: Slot = Arc::new(Mutex::new(session));
        Self {
            slots: Arc::new(vec![slot]),
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of sessions not currently checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free session.
    pub async fn checkout(&self) -> Result<SessionGuard> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("session pool closed".to_string()))?;

        for (index, slot) in self.slots.iter().enumerate() {
            if let Ok(session) = slot.clone().try_lock_owned() {
                trace!(slot = index, "Session checked out");
                return Ok(SessionGuard {
                    session,
                    _permit: permit,
                });
            }
        }
        Err(Error::Internal(
            "no free session despite available permit".to_string(),
        ))
    }
}
