//! Call-scoped deadline, cancellation and metadata
//!
//! A [`CallContext`] moves from active to cancelled or expired exactly once.
//! Every suspension point in the engine races its work against
//! [`CallContext::done`].

use std::{
    collections::BTreeMap,
    sync::{Arc, OnceLock},
    time::Duration,
};

use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::errors::Status;

pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("call was cancelled")]
    Cancelled,
    #[error("call deadline exceeded")]
    DeadlineExceeded,
}

impl From<ContextError> for Status {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Status::cancelled(err.to_string()),
            ContextError::DeadlineExceeded => Status::deadline_exceeded(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Active,
    Cancelled,
    Expired,
}

impl From<ContextError> for ContextState {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::Expired,
        }
    }
}

#[derive(Debug)]
struct ContextInner {
    token: CancellationToken,
    outcome: OnceLock<ContextError>,
    deadline: Option<Instant>,
    metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct CallContext {
    inner: Arc<ContextInner>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CallContext {
    /// A root context with no deadline and no metadata.
    pub fn background() -> Self {
        Self::build(CancellationToken::new(), None, Metadata::new())
    }

    fn build(token: CancellationToken, deadline: Option<Instant>, metadata: Metadata) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                token,
                outcome: OnceLock::new(),
                deadline,
                metadata,
            }),
        }
    }

    fn child(&self, deadline: Option<Instant>, metadata: Metadata) -> Self {
        Self::build(self.inner.token.child_token(), deadline, metadata)
    }

    /// Derives a child with the same deadline and metadata that can be
    /// cancelled without affecting this context.
    pub fn with_cancel(&self) -> Self {
        self.child(self.inner.deadline, self.inner.metadata.clone())
    }

    /// Derives a child that expires `timeout` from now, or earlier if this
    /// context's own deadline comes first. A timeout past the clock's range
    /// adds no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.with_cancel(),
        }
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let effective = match self.inner.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };
        self.child(Some(effective), self.inner.metadata.clone())
    }

    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut metadata = self.inner.metadata.clone();
        metadata.insert(key.into(), value.into());
        self.child(self.inner.deadline, metadata)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    pub fn state(&self) -> ContextState {
        match self.error() {
            None => ContextState::Active,
            Some(err) => err.into(),
        }
    }

    /// Cancels this context and every context derived from it. Has no effect
    /// once the context has already ended.
    pub fn cancel(&self) {
        if self.error().is_some() {
            return;
        }
        if self.latch(ContextError::Cancelled) == ContextError::Cancelled {
            self.inner.token.cancel();
        }
    }

    pub fn is_done(&self) -> bool {
        self.error().is_some()
    }

    /// Non-blocking check. The first terminal state observed is latched and
    /// reported from then on.
    pub fn error(&self) -> Option<ContextError> {
        if let Some(err) = self.inner.outcome.get() {
            return Some(*err);
        }

        let expired = self
            .inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if expired {
            Some(self.latch(ContextError::DeadlineExceeded))
        } else if self.inner.token.is_cancelled() {
            Some(self.latch(ContextError::Cancelled))
        } else {
            None
        }
    }

    fn latch(&self, err: ContextError) -> ContextError {
        *self.inner.outcome.get_or_init(|| err)
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.error() {
            return err;
        }

        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }

        // a cancelled token or a passed deadline always latches an outcome
        self.error().unwrap_or(ContextError::Cancelled)
    }

    /// Waits for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
