use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};

use tokio::sync::{Mutex, MutexGuard};

use dialogpress_core::session::{Conversation, SessionPhase};

/// Name used when a caller does not pick a session.
pub const DEFAULT_SESSION: &str = "default";

struct SessionInner {
    conversation: Mutex<Conversation>,
    phase: AtomicU8,
}

/// Shared handle to one conversation.
///
/// Mutating requests hold the conversation lock across the model call. The
/// phase lives outside the lock so it can be read while a call is in flight.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                conversation: Mutex::new(Conversation::new()),
                phase: AtomicU8::new(SessionPhase::Empty.as_u8()),
            }),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.inner.phase.load(Ordering::SeqCst))
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        self.inner.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Conversation> {
        self.inner.conversation.lock().await
    }
}

/// Puts the phase back to where it was unless the request commits.
///
/// Covers both error returns and futures dropped mid-call.
pub(crate) struct PhaseRestore<'a> {
    session: &'a SessionHandle,
    prior: SessionPhase,
    armed: bool,
}

impl<'a> PhaseRestore<'a> {
    pub(crate) fn new(session: &'a SessionHandle) -> Self {
        Self {
            session,
            prior: session.phase(),
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PhaseRestore<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.set_phase(self.prior);
        }
    }
}

/// Named sessions for the HTTP surface.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: StdMutex<HashMap<String, SessionHandle>>,
}

fn registry_key(name: Option<&str>) -> &str {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_SESSION)
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> StdMutexGuard<'_, HashMap<String, SessionHandle>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fetch a session by name, creating it on first use. `None` or a blank
    /// name selects the default session.
    pub fn get_or_create(&self, name: Option<&str>) -> SessionHandle {
        let key = registry_key(name);
        self.sessions().entry(key.to_string()).or_default().clone()
    }

    /// Fetch a session without creating it.
    pub fn get(&self, name: Option<&str>) -> Option<SessionHandle> {
        self.sessions().get(registry_key(name)).cloned()
    }

    /// Forget a named session. The default session is never removed.
    pub fn remove(&self, name: Option<&str>) -> Option<SessionHandle> {
        let key = registry_key(name);
        if key == DEFAULT_SESSION {
            return None;
        }
        self.sessions().remove(key)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions().keys().cloned().collect();
        names.sort();
        names
    }
}
