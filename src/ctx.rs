//! Cancellation context plumbed through every phase.
//!
//! Cheap to clone and share across threads; cancellation is cooperative and
//! checked at I/O batch boundaries. A cancelled write can leave an
//! uncommitted log tail, which the open-time recovery rule discards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
pub struct Ctx {
    cancelled: Arc<AtomicBool>,
}

impl Ctx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; observed at the next check point.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Bail out with `StoreError::Cancelled` if cancellation was requested.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled.into());
        }
        Ok(())
    }
}
