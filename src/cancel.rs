//! Cooperative cancellation keyed by execution id.

use std::sync::{Arc, RwLock};

/// Wildcard id that cancels whatever is running.
pub const ANY_EXECUTION: &str = "*";

/// Holds the currently requested cancellation, if any.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    requested: RwLock<Option<String>>,
}

impl CancelRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Request cancellation of `execution_id`, or of any run when `None` or `"*"`.
    pub fn request(&self, execution_id: Option<&str>) {
        let id = execution_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(ANY_EXECUTION)
            .to_string();
        *self.requested.write().unwrap_or_else(|e| e.into_inner()) = Some(id);
    }

    pub fn clear(&self) {
        *self.requested.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_requested(&self, execution_id: &str) -> bool {
        match self.requested.read().unwrap_or_else(|e| e.into_inner()).as_deref() {
            Some(ANY_EXECUTION) => true,
            Some(id) => id == execution_id,
            None => false,
        }
    }

    pub fn token(self: &Arc<Self>, execution_id: impl Into<String>) -> CancelToken {
        CancelToken {
            registry: Arc::clone(self),
            execution_id: execution_id.into(),
        }
    }
}

/// A run's view of the registry.
#[derive(Debug, Clone)]
pub struct CancelToken {
    registry: Arc<CancelRegistry>,
    execution_id: String,
}

impl CancelToken {
    /// A token with its own private registry.
    pub fn standalone(execution_id: impl Into<String>) -> Self {
        CancelRegistry::new().token(execution_id)
    }

    pub fn is_cancelled(&self) -> bool {
        self.registry.is_requested(&self.execution_id)
    }

    pub fn cancel(&self) {
        self.registry.request(Some(&self.execution_id));
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targeted_and_wildcard() {
        let reg = CancelRegistry::new();
        let a = reg.token("a");
        let b = reg.token("b");
        reg.request(Some("a"));
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        reg.request(None);
        assert!(b.is_cancelled());
        reg.clear();
        assert!(!a.is_cancelled());
    }

    #[test]
    fn test_standalone_token() {
        let t = CancelToken::standalone("x");
        assert!(!t.is_cancelled());
        t.cancel();
        assert!(t.is_cancelled());
    }
}
