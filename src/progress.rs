//! Shared progress accounting for batch uploads.
//!
//! The batch controller is the only writer; the UI reads snapshots. The sink
//! is injected rather than global, and only ever reflects completed
//! attempts, never in-flight ones.

use serde::Serialize;
use std::sync::Mutex;

/// Mutable progress record for the one active batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub is_uploading: bool,
    pub current: usize,
    pub total: usize,
    pub success_count: usize,
    pub fail_count: usize,
}

/// Receiver for batch progress events.
///
/// `start` resets the record and flags an active upload; `update` lands after
/// every completed attempt; `complete`/`cancel` end the run and clear the
/// uploading flag. Implementations must tolerate being read from other
/// threads while the batch writes.
pub trait ProgressSink: Send + Sync {
    fn start(&self, total: usize);
    fn update(&self, current: usize, success: usize, fail: usize);
    fn complete(&self);
    fn cancel(&self);
}

/// The provided sink: a mutex-wrapped record the UI polls via `snapshot`.
///
/// At most one batch may be active at a time; callers enforce that by
/// checking `is_uploading()` before starting another batch.
#[derive(Default)]
pub struct SharedProgress {
    inner: Mutex<UploadProgress>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current progress, by value.
    pub fn snapshot(&self) -> UploadProgress {
        self.inner.lock().map(|p| *p).unwrap_or_default()
    }

    /// Re-entrancy guard for callers: `true` while a batch is running.
    pub fn is_uploading(&self) -> bool {
        self.snapshot().is_uploading
    }
}

impl ProgressSink for SharedProgress {
    fn start(&self, total: usize) {
        if let Ok(mut p) = self.inner.lock() {
            *p = UploadProgress {
                is_uploading: true,
                current: 0,
                total,
                success_count: 0,
                fail_count: 0,
            };
        }
    }

    fn update(&self, current: usize, success: usize, fail: usize) {
        if let Ok(mut p) = self.inner.lock() {
            p.current = current;
            p.success_count = success;
            p.fail_count = fail;
        }
    }

    fn complete(&self) {
        if let Ok(mut p) = self.inner.lock() {
            p.is_uploading = false;
        }
    }

    fn cancel(&self) {
        if let Ok(mut p) = self.inner.lock() {
            p.is_uploading = false;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
