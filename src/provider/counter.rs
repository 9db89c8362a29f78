//! Running provider count and its RAII guard.

use std::sync::atomic::{AtomicU64, Ordering};

static ACTIVE_PROVIDERS: AtomicU64 = AtomicU64::new(0);

/// Held by a worker for as long as it runs.
pub(super) struct ActiveProvider;

impl ActiveProvider {
    pub(super) fn new() -> Self {
        ACTIVE_PROVIDERS.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_providers();
        Self
    }
}

impl Drop for ActiveProvider {
    fn drop(&mut self) {
        ACTIVE_PROVIDERS.fetch_sub(1, Ordering::Relaxed);
        crate::metrics::dec_providers();
    }
}

/// Number of provider workers currently running in this process.
#[must_use]
pub fn active_provider_count() -> u64 { ACTIVE_PROVIDERS.load(Ordering::Relaxed) }

pub(super) fn current_count() -> u64 { ACTIVE_PROVIDERS.load(Ordering::Relaxed) }
