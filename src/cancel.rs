use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::DumpError;

/// A cooperative cancellation signal shared between a conversion job
/// and its owner. The pipeline checks it at every I/O suspension point:
/// line reads, directory-listing batches, and row-batch flushes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), DumpError> {
        if self.is_cancelled() {
            return Err(DumpError::Cancelled);
        }
        Ok(())
    }
}
