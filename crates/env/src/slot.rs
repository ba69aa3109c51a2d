//! Shared cell holding the most recent execution result.

use jobctx_core::ExecutionResult;
use std::sync::{Arc, RwLock};

/// Cell shared between a context environment and whoever handed it in.
///
/// Clones refer to the same cell. Writes are last-writer-wins.
#[derive(Debug, Clone, Default)]
pub struct ResultSlot {
    inner: Arc<RwLock<Option<ExecutionResult>>>,
}

impl ResultSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored result.
    pub fn set(&self, result: ExecutionResult) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(result);
    }

    /// Copy of the stored result, if any.
    pub fn get(&self) -> Option<ExecutionResult> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobctx_core::JobId;

    #[test]
    fn test_clones_share_the_cell() {
        let slot = ResultSlot::new();
        let holder = slot.clone();
        assert!(holder.is_empty());

        let result = ExecutionResult::detached(JobId::new());
        slot.set(result.clone());
        assert_eq!(holder.get(), Some(result));
    }

    #[test]
    fn test_last_write_wins() {
        let slot = ResultSlot::new();
        let first = ExecutionResult::detached(JobId::new());
        let second = ExecutionResult::detached(JobId::new());
        slot.set(first);
        slot.set(second.clone());
        assert_eq!(slot.get(), Some(second));
        assert!(!slot.is_empty());
    }
}
