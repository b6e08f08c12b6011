//! Usage tracking across turns.

use std::sync::{Arc, PoisonError, RwLock};

use crate::types::Usage;

/// Tracks cumulative usage across the turns of a conversation.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    inner: Arc<RwLock<UsageTrackerInner>>,
}

#[derive(Debug, Default)]
struct UsageTrackerInner {
    total_usage: Usage,
    turn_count: u64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the summed usage of one finished turn.
    pub fn record(&self, usage: &Usage) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.total_usage.accumulate(usage);
        inner.turn_count += 1;
    }

    pub fn total_usage(&self) -> Usage {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .total_usage
            .clone()
    }

    /// Number of turns that reported usage.
    pub fn turn_count(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).turn_count
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *inner = UsageTrackerInner::default();
    }
}
