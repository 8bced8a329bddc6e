//! Progress reporting and cooperative cancellation
//!
//! Reporting and cancellation are separate collaborators; extraction code
//! only sees them through [`ExtractContext::checkpoint`], which reports the
//! current position and then polls for cancellation.

use crate::error::{Result, UnpackError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Receives absolute byte progress through the package being extracted
pub trait Progress {
    /// `label` names the output currently being written, `offset` is the
    /// absolute byte offset reached in the package file
    fn report(&self, label: &str, offset: u64);
}

impl<F: Fn(&str, u64)> Progress for F {
    fn report(&self, label: &str, offset: u64) {
        self(label, offset)
    }
}

/// Answers whether the running extraction should stop
pub trait Cancellation {
    fn is_cancelled(&self) -> bool;
}

/// Discards progress reports
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&self, _label: &str, _offset: u64) {}
}

/// Logs progress reports at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn report(&self, label: &str, offset: u64) {
        debug!("progress: {} @ 0x{:x}", label, offset);
    }
}

/// Never requests cancellation
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Shareable cancellation flag, set from any thread
#[derive(Debug, Default, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the running extraction
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clear a previous request
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl Cancellation for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress sink and cancellation poll composed for one extraction
#[derive(Clone, Copy)]
pub struct ExtractContext<'a> {
    progress: &'a dyn Progress,
    cancel: &'a dyn Cancellation,
}

static NO_PROGRESS: NoProgress = NoProgress;
static NEVER_CANCEL: NeverCancel = NeverCancel;

impl<'a> ExtractContext<'a> {
    pub fn new(progress: &'a dyn Progress, cancel: &'a dyn Cancellation) -> Self {
        Self { progress, cancel }
    }

    /// Report `offset`, then fail with [`UnpackError::Cancelled`] if a stop was requested
    pub fn checkpoint(&self, label: &str, offset: u64) -> Result<()> {
        self.progress.report(label, offset);
        if self.cancel.is_cancelled() {
            debug!("cancellation requested at 0x{:x}", offset);
            return Err(UnpackError::Cancelled);
        }
        Ok(())
    }

    /// Report without polling for cancellation
    pub fn report(&self, label: &str, offset: u64) {
        self.progress.report(label, offset);
    }
}

impl ExtractContext<'static> {
    /// Context that reports nowhere and never cancels
    pub fn silent() -> Self {
        Self::new(&NO_PROGRESS, &NEVER_CANCEL)
    }
}
