//! Session state machine and login mutex. The mutex is keyed
//! by a generation counter rather than a plain lock so that concurrent
//! session-invalidation storms collapse into a single login POST: a waiter
//! that observes the generation has already advanced past its own snapshot
//! skips the login entirely and just replays its request against the fresh
//! cookies.

use std::future::Future;
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Authenticating,
    Ready,
    Reauthenticating,
    Disposed,
}

/// Tracks the session's coarse lifecycle state. A plain `std::sync::Mutex`
/// suffices — reads/writes are brief enum swaps, never held across an `.await`.
pub struct SessionTracker {
    state: Mutex<SessionState>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self { state: Mutex::new(SessionState::New) }
    }

    pub fn get(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn set(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn is_ready(&self) -> bool {
        self.get() == SessionState::Ready
    }

    pub fn is_disposed(&self) -> bool {
        self.get() == SessionState::Disposed
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-adapter-instance login mutex. Not per-process — the scheduler's
/// tenant serialization already prevents inter-tenant collisions, so each
/// adapter owns exactly one of these.
pub struct LoginMutex {
    generation: AsyncMutex<u64>,
}

impl LoginMutex {
    pub fn new() -> Self {
        Self { generation: AsyncMutex::new(0) }
    }

    pub async fn generation(&self) -> u64 {
        *self.generation.lock().await
    }

    /// Ensures a login has completed since `observed_generation`. If another
    /// caller already relogged in after the caller's session went stale, this
    /// returns immediately without issuing a second login POST.
    pub async fn reauthenticate<F, Fut>(&self, observed_generation: u64, login: F) -> Result<u64>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut gen = self.generation.lock().await;
        if *gen > observed_generation {
            return Ok(*gen);
        }
        login().await?;
        *gen += 1;
        Ok(*gen)
    }
}

impl Default for LoginMutex {
    fn default() -> Self {
        Self::new()
    }
}
