//! Per-request context: correlation id, deadline and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Why a request stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// Carried through every synchronous operation.
///
/// Clones share the cancellation flag, so cancelling any clone cancels the
/// whole request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: Uuid,
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns an error once the request is cancelled or past its deadline.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_live() {
        let ctx = RequestContext::new();
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let ctx = RequestContext::new();
        let clone = ctx.clone();
        clone.cancel();
        assert_eq!(ctx.check(), Err(ContextError::Cancelled));
        assert_eq!(ctx.correlation_id(), clone.correlation_id());
    }

    #[test]
    fn elapsed_deadline_is_reported() {
        let ctx = RequestContext::new().with_deadline(Instant::now());
        assert_eq!(ctx.check(), Err(ContextError::DeadlineExceeded));
    }

    #[test]
    fn explicit_correlation_id_is_kept() {
        let id = Uuid::new_v4();
        assert_eq!(RequestContext::new().with_correlation_id(id).correlation_id(), id);
    }
}
