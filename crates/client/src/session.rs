//! Session token, request counter and login state.
//!
//! All three live behind one mutex so that reading the token and taking the
//! next request id happen in a single critical section.

use std::fmt;

use parking_lot::Mutex;

/// Lifecycle of a connection to one recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// No login attempted yet.
    #[default]
    New,
    /// The device answered the login probe with a challenge.
    LoginChallengeSent,
    /// A session token is held.
    Authenticated,
    /// The session was torn down.
    LoggedOut,
}

#[derive(Default)]
struct SessionState {
    token: Option<String>,
    counter: u64,
    state: ClientState,
}

/// Mutable per-connection session data.
#[derive(Default)]
pub struct Session {
    inner: Mutex<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the request counter and returns the new value.
    pub fn next_id(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.counter += 1;
        inner.counter
    }

    /// Takes the next request id and, when `include_session` is set, the
    /// current token, under one lock acquisition.
    pub fn begin_request(&self, include_session: bool) -> (u64, Option<String>) {
        let mut inner = self.inner.lock();
        inner.counter += 1;
        let token = if include_session {
            inner.token.clone()
        } else {
            None
        };
        (inner.counter, token)
    }

    /// Current session token.
    pub fn token(&self) -> Option<String> {
        self.inner.lock().token.clone()
    }

    pub fn has_token(&self) -> bool {
        self.inner.lock().token.is_some()
    }

    /// Current value of the request counter.
    pub fn counter(&self) -> u64 {
        self.inner.lock().counter
    }

    pub fn state(&self) -> ClientState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: ClientState) {
        self.inner.lock().state = state;
    }

    /// Stores a token and restarts the counter at `counter`.
    pub fn establish(&self, token: String, counter: u64) {
        let mut inner = self.inner.lock();
        inner.token = Some(token);
        inner.counter = counter;
        inner.state = ClientState::Authenticated;
    }

    /// Replaces the token, keeping the counter.
    pub fn set_token(&self, token: String) {
        let mut inner = self.inner.lock();
        inner.token = Some(token);
        inner.state = ClientState::Authenticated;
    }

    /// Drops the token and resets the counter to 0.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.token = None;
        inner.counter = 0;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("token", &inner.token.as_ref().map(|_| "[REDACTED]"))
            .field("counter", &inner.counter)
            .field("state", &inner.state)
            .finish()
    }
}
