//! Login-session custody for the task user.
//!
//! One [`SessionBroker`] per worker process owns the impersonated task
//! user's context: account name, credential secret, and the live login
//! session with its derived access token. Execution slots share the
//! broker; every refresh-then-stamp pass runs under one exclusive lock so
//! no slot can observe a half-updated context.
//!
//! # Invariants
//!
//! - [INV-SES-001] A refresh either fully replaces the session, token,
//!   and generation, or leaves all three untouched.
//! - [INV-SES-002] Every descriptor stamped in one pass carries the same
//!   token, minted by a refresh completed in that same critical section.
//! - [INV-SES-003] The session generation increases by exactly one per
//!   successful refresh and never otherwise.
//! - [INV-SES-004] Credential secrets never appear in errors or logs.

use std::sync::{Mutex, MutexGuard};

use secrecy::SecretString;
use thiserror::Error;

use super::TaskCredentials;
use crate::launch::LaunchSpec;

// ─────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────

/// Errors from login-session operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// No task user has been installed in the session context.
    #[error(
        "no task user installed in the session context; provision a task user before refreshing"
    )]
    NoTaskUser,

    /// The platform refused to establish a login session.
    #[error("failed to establish login session for task user '{user}': {reason}")]
    EstablishFailed {
        /// The task user's account name.
        user: String,
        /// Platform-reported cause. Never contains credential material.
        reason: String,
    },

    /// The task-user context lock was poisoned by a panicking thread.
    #[error("task-user session context lock poisoned")]
    LockPoisoned,
}

// ─────────────────────────────────────────────────────────────────────────
// Sessions and tokens
// ─────────────────────────────────────────────────────────────────────────

/// A live login session for the task user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSession {
    user: String,
    handle: u64,
}

impl LoginSession {
    /// Record a session established for `user` under the platform's
    /// opaque session handle.
    #[must_use]
    pub fn new(user: impl Into<String>, handle: u64) -> Self {
        Self {
            user: user.into(),
            handle,
        }
    }

    /// Account name the session was established for.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Opaque platform session handle.
    #[must_use]
    pub const fn handle(&self) -> u64 {
        self.handle
    }
}

/// Access token derived from a login session, tagged with the generation
/// of the refresh that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessToken {
    handle: u64,
    generation: u64,
}

impl AccessToken {
    pub(crate) const fn new(handle: u64, generation: u64) -> Self {
        Self { handle, generation }
    }

    /// Opaque platform token handle.
    #[must_use]
    pub const fn handle(&self) -> u64 {
        self.handle
    }

    /// Refresh generation that minted this token.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────

/// Platform binding that actually establishes login sessions.
///
/// Real deployments wire an OS-specific implementation; tests use fakes.
/// `establish` is called while the broker holds the context lock, so
/// implementations must not call back into the broker.
pub trait SessionBackend: Send + Sync {
    /// Establish a fresh login session for `user` with the given secret.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EstablishFailed`] when the platform denies
    /// the logon. The error names the user and cause without exposing the
    /// secret.
    fn establish(&self, user: &str, secret: &SecretString) -> Result<LoginSession, SessionError>;
}

// ─────────────────────────────────────────────────────────────────────────
// Context and broker
// ─────────────────────────────────────────────────────────────────────────

/// Process-wide impersonated-identity state, guarded by the broker lock.
#[derive(Debug)]
struct TaskUserContext {
    user: String,
    secret: SecretString,
    session: Option<LoginSession>,
    token: Option<AccessToken>,
    generation: u64,
}

/// Lock-guarded owner of the task-user login session.
///
/// `B` is the platform binding. The broker is shared behind `Arc` by all
/// execution slots; its mutex is the single cross-slot critical section
/// in the isolation layer. Callers must not hold other slot-shared locks
/// while calling into the broker.
#[derive(Debug)]
pub struct SessionBroker<B: SessionBackend> {
    backend: B,
    context: Mutex<Option<TaskUserContext>>,
}

impl<B: SessionBackend> SessionBroker<B> {
    /// Create a broker with no task user installed.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            context: Mutex::new(None),
        }
    }

    /// Install the provisioned task user, replacing any previous context.
    ///
    /// Called by the worker's provisioning path, not per task. The
    /// session generation restarts at zero for the new account; no
    /// session is established until the first refresh.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LockPoisoned`] if the context lock was
    /// poisoned.
    pub fn install_user(&self, credentials: TaskCredentials) -> Result<(), SessionError> {
        let (user, secret) = credentials.into_parts();
        let mut guard = self.lock()?;
        *guard = Some(TaskUserContext {
            user,
            secret,
            session: None,
            token: None,
            generation: 0,
        });
        Ok(())
    }

    /// Refresh the login session, replacing session, token, and
    /// generation in one step.
    ///
    /// The backend call happens while the context lock is held, so a
    /// concurrent slot can neither observe the old token mid-replacement
    /// nor interleave its own refresh.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoTaskUser`] before a user is installed;
    /// [`SessionError::EstablishFailed`] from the backend, in which case
    /// the previous session and token remain in place;
    /// [`SessionError::LockPoisoned`] if the context lock was poisoned.
    pub fn refresh(&self) -> Result<AccessToken, SessionError> {
        let mut guard = self.lock()?;
        let context = guard.as_mut().ok_or(SessionError::NoTaskUser)?;
        Self::refresh_locked(&self.backend, context)
    }

    /// Refresh the login session and stamp the fresh token onto every
    /// descriptor, as one critical section.
    ///
    /// # Errors
    ///
    /// Same as [`Self::refresh`]. On error no descriptor is modified.
    pub fn refresh_and_stamp(
        &self,
        specs: &mut [LaunchSpec],
    ) -> Result<AccessToken, SessionError> {
        let mut guard = self.lock()?;
        let context = guard.as_mut().ok_or(SessionError::NoTaskUser)?;
        let token = Self::refresh_locked(&self.backend, context)?;
        for spec in specs.iter_mut() {
            spec.set_access_token(token);
        }
        Ok(token)
    }

    /// The current access token, if a session has been established.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LockPoisoned`] if the context lock was
    /// poisoned.
    pub fn current_token(&self) -> Result<Option<AccessToken>, SessionError> {
        Ok(self.lock()?.as_ref().and_then(|context| context.token))
    }

    /// Number of successful refreshes for the installed task user, zero
    /// before the first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LockPoisoned`] if the context lock was
    /// poisoned.
    pub fn session_generation(&self) -> Result<u64, SessionError> {
        Ok(self.lock()?.as_ref().map_or(0, |context| context.generation))
    }

    /// Account name of the installed task user, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LockPoisoned`] if the context lock was
    /// poisoned.
    pub fn user(&self) -> Result<Option<String>, SessionError> {
        Ok(self.lock()?.as_ref().map(|context| context.user.clone()))
    }

    /// Handle of the live login session, if one has been established.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LockPoisoned`] if the context lock was
    /// poisoned.
    pub fn session_handle(&self) -> Result<Option<u64>, SessionError> {
        Ok(self
            .lock()?
            .as_ref()
            .and_then(|context| context.session.as_ref().map(LoginSession::handle)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<TaskUserContext>>, SessionError> {
        self.context.lock().map_err(|_| SessionError::LockPoisoned)
    }

    fn refresh_locked(
        backend: &B,
        context: &mut TaskUserContext,
    ) -> Result<AccessToken, SessionError> {
        // Establish first; the context is only written on success.
        let session = backend.establish(&context.user, &context.secret)?;
        let generation = context.generation + 1;
        let token = AccessToken::new(session.handle(), generation);
        context.session = Some(session);
        context.token = Some(token);
        context.generation = generation;
        tracing::debug!(user = %context.user, generation, "task user login session refreshed");
        Ok(token)
    }
}
