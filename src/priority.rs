// src/priority.rs
use crate::{Result, Stage, TierqError};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Priority tier of a job within a stage.
///
/// `Fail` and `Success` are terminal markers that only appear at the `done` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
    Fail,
    Success,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::Fail => "fail",
            Priority::Success => "success",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Priority::Fail | Priority::Success)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = TierqError;

    fn from_str(s: &str) -> Result<Self> {
        PriorityPolicy::all()
            .iter()
            .copied()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| TierqError::InvalidPriority(s.to_string()))
    }
}

/// Pop precedence, highest first.
const QUEUE_TIERS: [Priority; 4] = [
    Priority::Critical,
    Priority::High,
    Priority::Medium,
    Priority::Low,
];

const ALL_TIERS: [Priority; 6] = [
    Priority::Critical,
    Priority::High,
    Priority::Medium,
    Priority::Low,
    Priority::Fail,
    Priority::Success,
];

/// Fixed tier ordering and the sortable score the store uses for it.
///
/// Lower scores are examined first; `score_of` increases in the same order
/// as `tiers()`.
pub struct PriorityPolicy;

impl PriorityPolicy {
    /// Queue tiers in pop precedence.
    pub fn tiers() -> &'static [Priority] {
        &QUEUE_TIERS
    }

    /// Every tier, terminal markers last.
    pub fn all() -> &'static [Priority] {
        &ALL_TIERS
    }

    /// Tiers a stage can hold, in examination order.
    pub fn tiers_for(stage: Stage) -> &'static [Priority] {
        match stage {
            Stage::Done => &ALL_TIERS,
            _ => &QUEUE_TIERS,
        }
    }

    pub fn score_of(tier: Priority) -> u8 {
        match tier {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
            Priority::Fail => 4,
            Priority::Success => 5,
        }
    }

    pub fn validate(label: &str) -> bool {
        label.parse::<Priority>().is_ok()
    }

    /// Normalize a tier label to its enumerated form.
    pub fn parse(label: &str) -> Result<Priority> {
        label.parse()
    }

    /// Reject terminal markers outside the `done` stage.
    pub fn check_stage(tier: Priority, stage: Stage) -> Result<()> {
        if Self::tiers_for(stage).contains(&tier) {
            Ok(())
        } else {
            Err(TierqError::InvalidPriority(format!(
                "{} is not a valid tier for stage {}",
                tier, stage
            )))
        }
    }
}
