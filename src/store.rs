// src/store.rs
use crate::{Priority, Result, Stage};
use async_trait::async_trait;

/// Atomic multi-key operations the queue client is built on.
///
/// Every method must run as one indivisible step against the backing store:
/// no other caller may observe a job removed from its source list but not yet
/// present in its destination. "Empty" and "not found" are reported through
/// the return value; `Err` is reserved for store failures.
#[async_trait]
pub trait AtomicStore: Send + Sync + 'static {
    /// Push `value` onto the head of `list`. Returns the new list length.
    async fn push(&self, list: &ListKey, value: &str) -> Result<u64>;

    /// Pop the oldest value of the first non-empty source tier, in the order
    /// given, and push it onto the head of the same tier under `destination`.
    async fn pop_move(
        &self,
        source: &StageKey,
        destination: &StageKey,
        tiers: &[Priority],
    ) -> Result<Option<(Priority, String)>>;

    /// Remove one exact `value` from `source` and, if it was present, push
    /// `replacement` onto `destination`. Returns 1 if moved, 0 if not found.
    async fn remove_move(
        &self,
        source: &ListKey,
        destination: &ListKey,
        value: &str,
        replacement: &str,
    ) -> Result<u64>;

    /// Length of each tier list under `stage`, in the order given.
    async fn length(&self, stage: &StageKey, tiers: &[Priority]) -> Result<Vec<(Priority, u64)>>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()>;
}

/// `{prefix}:{queue}:{stage}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageKey {
    namespace: String,
    stage: Stage,
}

impl StageKey {
    pub fn new(namespace: impl Into<String>, stage: Stage) -> Self {
        Self {
            namespace: namespace.into(),
            stage,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn tier(&self, tier: Priority) -> ListKey {
        ListKey {
            stage: self.clone(),
            tier,
        }
    }
}

impl std::fmt::Display for StageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.stage)
    }
}

/// `{prefix}:{queue}:{stage}:{tier}`, the list a job lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
    stage: StageKey,
    tier: Priority,
}

impl ListKey {
    pub fn stage(&self) -> Stage {
        self.stage.stage
    }

    pub fn tier(&self) -> Priority {
        self.tier
    }
}

impl std::fmt::Display for ListKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.stage, self.tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_namespace_layout() {
        let stage = StageKey::new("nqueue:emails", Stage::Queued);
        assert_eq!(stage.to_string(), "nqueue:emails:queued");

        let list = stage.tier(Priority::Critical);
        assert_eq!(list.to_string(), "nqueue:emails:queued:critical");
        assert_eq!(list.stage(), Stage::Queued);
        assert_eq!(list.tier(), Priority::Critical);
    }
}
