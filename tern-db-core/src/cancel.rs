//! Cancellation contexts
//!
//! Every request carries an [`OpContext`] down the call tree. The selector
//! checks it at per-row batch boundaries; sync workers poll it before each
//! chunk application. Variants: none, explicit (a shared flag flipped by the
//! caller), and timeout (a deadline).

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag for explicit cancellation
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Default)]
enum CancelKind {
    #[default]
    None,
    Explicit(CancelFlag),
    Timeout(Instant),
}

/// Per-operation context: cancellation plus replication flags
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancelKind,
    /// Readers normally block until initial leader sync completes; the sync
    /// workers themselves must not, or they would deadlock on their own
    /// barrier.
    pub no_wait_sync: bool,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(flag: CancelFlag) -> Self {
        Self {
            cancel: CancelKind::Explicit(flag),
            no_wait_sync: false,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancelKind::Timeout(Instant::now() + timeout),
            no_wait_sync: false,
        }
    }

    pub fn with_no_wait_sync(mut self) -> Self {
        self.no_wait_sync = true;
        self
    }

    /// Deadline, when this is a timeout context
    pub fn deadline(&self) -> Option<Instant> {
        match &self.cancel {
            CancelKind::Timeout(d) => Some(*d),
            _ => None,
        }
    }

    /// Fail fast when the operation was cancelled or timed out
    pub fn check(&self) -> Result<()> {
        match &self.cancel {
            CancelKind::None => Ok(()),
            CancelKind::Explicit(flag) => {
                if flag.is_cancelled() {
                    Err(Error::Cancelled("context is cancelled".into()))
                } else {
                    Ok(())
                }
            }
            CancelKind::Timeout(deadline) => {
                if Instant::now() >= *deadline {
                    Err(Error::Timeout("context deadline exceeded".into()))
                } else {
                    Ok(())
                }
            }
        }
    }
}
