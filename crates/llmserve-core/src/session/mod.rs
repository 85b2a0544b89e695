//! The single shared inference session and its exclusive-access guard.
//!
//! Exactly one [`Session`] exists per process. Requests reach it through a
//! [`SharedSession`], which hands out an owned mutex guard; the guard travels
//! with the blocking generation task and is released when that task ends,
//! whatever the outcome.

mod controller;

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, Span};

use crate::config::{BusyPolicy, SessionConfig};
use crate::engine::InferenceEngine;
use crate::error::{Error, Result};
use crate::stats::RunStatistics;

/// Exclusive access to the session for the duration of one request.
pub type SessionGuard = OwnedMutexGuard<Session>;

/// A loaded engine plus per-process bookkeeping.
pub struct Session {
    engine: Box<dyn InferenceEngine>,
    max_decode_steps: usize,
    requests_served: u64,
    requests_failed: u64,
}

impl Session {
    pub fn new(engine: Box<dyn InferenceEngine>, config: &SessionConfig) -> Self {
        Self {
            engine,
            max_decode_steps: config.max_decode_steps,
            requests_served: 0,
            requests_failed: 0,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    pub fn requests_failed(&self) -> u64 {
        self.requests_failed
    }
}

/// Generated text and statistics of a buffered run.
#[derive(Debug, Clone)]
pub struct BufferedOutput {
    pub text: String,
    pub stats: RunStatistics,
}

/// Cloneable handle to the process-wide session.
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<Session>>,
    policy: BusyPolicy,
}

impl SharedSession {
    pub fn new(session: Session, policy: BusyPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
            policy,
        }
    }

    /// Take the session, waiting or failing with [`Error::SessionBusy`]
    /// according to the busy policy.
    pub async fn acquire(&self) -> Result<SessionGuard> {
        match self.policy {
            BusyPolicy::Wait => {
                if let Ok(guard) = self.inner.clone().try_lock_owned() {
                    return Ok(guard);
                }
                debug!("Session busy, waiting");
                Ok(self.inner.clone().lock_owned().await)
            }
            BusyPolicy::Reject => self
                .inner
                .clone()
                .try_lock_owned()
                .map_err(|_| Error::SessionBusy),
        }
    }

    /// True while some request holds the session.
    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Run one request to completion into a memory buffer.
///
/// The engine runs on the blocking pool; the guard is dropped there as soon
/// as generation ends.
pub async fn run_buffered(guard: SessionGuard, prompt: String) -> Result<BufferedOutput> {
    let span = Span::current();
    tokio::task::spawn_blocking(move || -> Result<BufferedOutput> {
        let _entered = span.enter();
        let mut session = guard;
        let mut buffer = Vec::new();
        let stats = session.handle(&prompt, &mut buffer)?;
        Ok(BufferedOutput {
            text: String::from_utf8_lossy(&buffer).into_owned(),
            stats,
        })
    })
    .await
    .map_err(|e| Error::InferenceError(format!("generation task failed: {}", e)))?
}
