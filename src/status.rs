// src/status.rs
use crate::{Priority, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-stage, per-tier job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    stages: BTreeMap<Stage, BTreeMap<Priority, u64>>,
}

impl StatusReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: Stage, counts: impl IntoIterator<Item = (Priority, u64)>) {
        self.stages.insert(stage, counts.into_iter().collect());
    }

    pub fn stage(&self, stage: Stage) -> Option<&BTreeMap<Priority, u64>> {
        self.stages.get(&stage)
    }

    /// Count for one tier; 0 when the stage or tier was not queried.
    pub fn count(&self, stage: Stage, tier: Priority) -> u64 {
        self.stages
            .get(&stage)
            .and_then(|tiers| tiers.get(&tier))
            .copied()
            .unwrap_or(0)
    }

    pub fn stage_total(&self, stage: Stage) -> u64 {
        self.stages
            .get(&stage)
            .map_or(0, |tiers| tiers.values().sum())
    }

    pub fn total(&self) -> u64 {
        self.stages.values().flat_map(|tiers| tiers.values()).sum()
    }

    pub fn stages(&self) -> impl Iterator<Item = (&Stage, &BTreeMap<Priority, u64>)> {
        self.stages.iter()
    }
}
