// src/transition.rs
use crate::{Result, Stage, TierqError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every time a job entered one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub status: Stage,
    #[serde(rename = "date")]
    pub dates: Vec<DateTime<Utc>>,
}

/// Append-only record of the stages a job has occupied.
///
/// Revisiting a stage appends a timestamp to its existing entry. Entries are
/// never removed or reordered, and timestamps never go backwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionLog {
    entries: Vec<TransitionEntry>,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: Stage, time: DateTime<Utc>) {
        // clamp so a skewed clock cannot break ordering
        let time = match self.latest() {
            Some(latest) if time < latest => latest,
            _ => time,
        };

        match self.entries.iter_mut().find(|entry| entry.status == stage) {
            Some(entry) => entry.dates.push(time),
            None => self.entries.push(TransitionEntry {
                status: stage,
                dates: vec![time],
            }),
        }
    }

    pub fn entries(&self) -> &[TransitionEntry] {
        &self.entries
    }

    pub fn entry(&self, stage: Stage) -> Option<&TransitionEntry> {
        self.entries.iter().find(|entry| entry.status == stage)
    }

    /// How many times the job has entered `stage`.
    pub fn visits(&self, stage: Stage) -> usize {
        self.entry(stage).map_or(0, |entry| entry.dates.len())
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter_map(|entry| entry.dates.last().copied())
            .max()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check a log read back from storage.
    pub(crate) fn validate(&self) -> Result<()> {
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.dates.is_empty() {
                return Err(TierqError::InvalidJob(format!(
                    "log entry for {} has no timestamps",
                    entry.status
                )));
            }
            if entry.dates.windows(2).any(|pair| pair[1] < pair[0]) {
                return Err(TierqError::InvalidJob(format!(
                    "log timestamps for {} go backwards",
                    entry.status
                )));
            }
            if self.entries[..index]
                .iter()
                .any(|earlier| earlier.status == entry.status)
            {
                return Err(TierqError::InvalidJob(format!(
                    "duplicate log entry for {}",
                    entry.status
                )));
            }
        }

        let firsts: Vec<_> = self.entries.iter().map(|entry| entry.dates[0]).collect();
        if firsts.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(TierqError::InvalidJob(
                "log entries are out of order".to_string(),
            ));
        }

        Ok(())
    }
}
