// src/memory.rs
use crate::{AtomicStore, ListKey, Priority, Result, StageKey, TierqError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// In-process store with the same list semantics as the Redis scripts.
///
/// A single lock guards every list, so each operation is atomic with respect
/// to all other callers sharing the store.
#[derive(Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of a list, head first.
    pub async fn list(&self, key: &ListKey) -> Vec<String> {
        self.lists
            .lock()
            .await
            .get(&key.to_string())
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(TierqError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AtomicStore for MemoryStore {
    async fn push(&self, list: &ListKey, value: &str) -> Result<u64> {
        self.ensure_open()?;
        let mut lists = self.lists.lock().await;
        let entries = lists.entry(list.to_string()).or_default();
        entries.push_front(value.to_string());
        Ok(entries.len() as u64)
    }

    async fn pop_move(
        &self,
        source: &StageKey,
        destination: &StageKey,
        tiers: &[Priority],
    ) -> Result<Option<(Priority, String)>> {
        self.ensure_open()?;
        let mut lists = self.lists.lock().await;

        for tier in tiers {
            let popped = lists
                .get_mut(&source.tier(*tier).to_string())
                .and_then(|list| list.pop_back());

            if let Some(value) = popped {
                lists
                    .entry(destination.tier(*tier).to_string())
                    .or_default()
                    .push_front(value.clone());
                return Ok(Some((*tier, value)));
            }
        }

        Ok(None)
    }

    async fn remove_move(
        &self,
        source: &ListKey,
        destination: &ListKey,
        value: &str,
        replacement: &str,
    ) -> Result<u64> {
        self.ensure_open()?;
        let mut lists = self.lists.lock().await;

        let removed = lists
            .get_mut(&source.to_string())
            .and_then(|list| {
                let index = list.iter().position(|entry| entry == value)?;
                list.remove(index)
            })
            .is_some();

        if !removed {
            return Ok(0);
        }

        lists
            .entry(destination.to_string())
            .or_default()
            .push_front(replacement.to_string());
        Ok(1)
    }

    async fn length(&self, stage: &StageKey, tiers: &[Priority]) -> Result<Vec<(Priority, u64)>> {
        self.ensure_open()?;
        let lists = self.lists.lock().await;

        Ok(tiers
            .iter()
            .map(|tier| {
                let len = lists
                    .get(&stage.tier(*tier).to_string())
                    .map_or(0, |list| list.len());
                (*tier, len as u64)
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PriorityPolicy, Stage};

    fn stage(stage: Stage) -> StageKey {
        StageKey::new("test:queue", stage)
    }

    #[tokio::test]
    async fn push_returns_new_length() {
        let store = MemoryStore::new();
        let list = stage(Stage::Queued).tier(Priority::High);

        assert_eq!(store.push(&list, "a").await.unwrap(), 1);
        assert_eq!(store.push(&list, "b").await.unwrap(), 2);
        assert_eq!(store.list(&list).await, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn pop_move_takes_oldest_of_highest_tier() {
        let store = MemoryStore::new();
        let queued = stage(Stage::Queued);
        let processing = stage(Stage::Processing);

        store.push(&queued.tier(Priority::Low), "low").await.unwrap();
        store.push(&queued.tier(Priority::High), "high-1").await.unwrap();
        store.push(&queued.tier(Priority::High), "high-2").await.unwrap();

        let moved = store
            .pop_move(&queued, &processing, PriorityPolicy::tiers())
            .await
            .unwrap();

        assert_eq!(moved, Some((Priority::High, "high-1".to_string())));
        assert_eq!(
            store.list(&processing.tier(Priority::High)).await,
            vec!["high-1"]
        );
        assert_eq!(
            store.list(&queued.tier(Priority::High)).await,
            vec!["high-2"]
        );
    }

    #[tokio::test]
    async fn pop_move_on_empty_stage_returns_none() {
        let store = MemoryStore::new();
        let moved = store
            .pop_move(
                &stage(Stage::Queued),
                &stage(Stage::Processing),
                PriorityPolicy::tiers(),
            )
            .await
            .unwrap();
        assert_eq!(moved, None);
    }

    #[tokio::test]
    async fn remove_move_is_exact_match() {
        let store = MemoryStore::new();
        let source = stage(Stage::Processing).tier(Priority::Medium);
        let destination = stage(Stage::Done).tier(Priority::Success);

        store.push(&source, "job-a").await.unwrap();

        assert_eq!(
            store
                .remove_move(&source, &destination, "job-b", "job-b'")
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .remove_move(&source, &destination, "job-a", "job-a'")
                .await
                .unwrap(),
            1
        );
        assert!(store.list(&source).await.is_empty());
        assert_eq!(store.list(&destination).await, vec!["job-a'"]);
    }

    #[tokio::test]
    async fn length_reports_every_requested_tier() {
        let store = MemoryStore::new();
        let queued = stage(Stage::Queued);
        store.push(&queued.tier(Priority::Critical), "x").await.unwrap();

        let counts = store
            .length(&queued, PriorityPolicy::tiers())
            .await
            .unwrap();

        assert_eq!(
            counts,
            vec![
                (Priority::Critical, 1),
                (Priority::High, 0),
                (Priority::Medium, 0),
                (Priority::Low, 0)
            ]
        );
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let store = MemoryStore::new();
        store.close().await.unwrap();

        let err = store
            .push(&stage(Stage::Queued).tier(Priority::Low), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, TierqError::Closed));
    }
}
