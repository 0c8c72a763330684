// src/job.rs
use crate::{Priority, PriorityPolicy, Result, TierqError, TransitionLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Unique identifier for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named phase of a job's lifecycle, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Scheduled,
    Queued,
    Processing,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Scheduled,
        Stage::Queued,
        Stage::Processing,
        Stage::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scheduled => "scheduled",
            Stage::Queued => "queued",
            Stage::Processing => "processing",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = TierqError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| TierqError::InvalidStage(s.to_string()))
    }
}

pub const DEFAULT_ATTEMPT_MAX: u32 = 3;
pub const DEFAULT_HOLD_SECS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptConfig {
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldConfig {
    /// Seconds a job may stay in processing before it counts as stalled.
    pub duration: u64,
}

/// One failure recorded against a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JobMeta {
    id: JobId,
    #[serde(default)]
    schedule: Map<String, Value>,
    priority: Priority,
    attempt: AttemptConfig,
    hold: HoldConfig,
    status: Option<Stage>,
    #[serde(default)]
    log: TransitionLog,
    #[serde(default)]
    error: Vec<JobError>,
}

/// Unvalidated wire shape.
#[derive(Deserialize)]
struct RawJob {
    meta: JobMeta,
    #[serde(default = "empty_object")]
    data: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// A job and its queue metadata.
///
/// Serializes as `{"meta": {...}, "data": ...}`. Deserialization validates the
/// metadata, so every `JobRecord` in memory satisfies the lifecycle invariants.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    meta: JobMeta,
    data: Value,
    /// Exact string last written to or read from the store.
    #[serde(skip)]
    stored: Option<String>,
}

impl<'de> Deserialize<'de> for JobRecord {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawJob::deserialize(deserializer)?;
        JobRecord::validated(raw).map_err(serde::de::Error::custom)
    }
}

impl JobRecord {
    fn validated(raw: RawJob) -> Result<Self> {
        let meta = raw.meta;

        if meta.attempt.max == 0 {
            return Err(TierqError::InvalidJob(
                "attempt max must be positive".to_string(),
            ));
        }

        meta.log.validate()?;

        match meta.status {
            Some(stage) => {
                if meta.log.entry(stage).is_none() {
                    return Err(TierqError::InvalidJob(format!(
                        "status {} missing from transition log",
                        stage
                    )));
                }
                PriorityPolicy::check_stage(meta.priority, stage)
                    .map_err(|e| TierqError::InvalidJob(e.to_string()))?;
            }
            None if !meta.log.is_empty() => {
                return Err(TierqError::InvalidJob(
                    "job without status has a transition log".to_string(),
                ));
            }
            None => {}
        }

        Ok(Self {
            meta,
            data: raw.data,
            stored: None,
        })
    }
}

impl TryFrom<Value> for JobRecord {
    type Error = TierqError;

    fn try_from(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| TierqError::InvalidJob(e.to_string()))
    }
}

impl PartialEq for JobRecord {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta && self.data == other.data
    }
}

impl Default for JobRecord {
    fn default() -> Self {
        Self::new(empty_object())
    }
}

impl JobRecord {
    pub fn new(data: Value) -> Self {
        Self {
            meta: JobMeta {
                id: JobId::new(),
                schedule: Map::new(),
                priority: Priority::default(),
                attempt: AttemptConfig {
                    max: DEFAULT_ATTEMPT_MAX,
                },
                hold: HoldConfig {
                    duration: DEFAULT_HOLD_SECS,
                },
                status: None,
                log: TransitionLog::new(),
                error: Vec::new(),
            },
            data,
            stored: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.meta.priority = priority;
        self
    }

    pub fn id(&self) -> JobId {
        self.meta.id
    }

    pub fn priority(&self) -> Priority {
        self.meta.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.meta.priority = priority;
    }

    pub fn set_priority_label(&mut self, label: &str) -> Result<()> {
        self.meta.priority = PriorityPolicy::parse(label)?;
        Ok(())
    }

    /// Current stage, `None` while the job is still new.
    pub fn stage(&self) -> Option<Stage> {
        self.meta.status
    }

    /// Move the job to `stage` and record the transition.
    pub fn set_stage(&mut self, stage: Stage) {
        self.meta.status = Some(stage);
        self.meta.log.record(stage, Utc::now());
    }

    pub(crate) fn enter(&mut self, stage: Stage, priority: Priority) -> Result<()> {
        PriorityPolicy::check_stage(priority, stage)?;
        self.meta.priority = priority;
        self.set_stage(stage);
        Ok(())
    }

    pub fn log(&self) -> &TransitionLog {
        &self.meta.log
    }

    pub fn attempt_max(&self) -> u32 {
        self.meta.attempt.max
    }

    pub fn set_attempt_max(&mut self, max: u32) -> Result<()> {
        if max == 0 {
            return Err(TierqError::InvalidAttempt(
                "attempt max must be positive".to_string(),
            ));
        }
        self.meta.attempt.max = max;
        Ok(())
    }

    /// Times the job has entered processing.
    pub fn attempts(&self) -> usize {
        self.meta.log.visits(Stage::Processing)
    }

    pub fn hold_duration(&self) -> u64 {
        self.meta.hold.duration
    }

    pub fn set_hold_duration(&mut self, seconds: u64) {
        self.meta.hold.duration = seconds;
    }

    /// Scheduler options, carried verbatim.
    pub fn schedule(&self) -> &Map<String, Value> {
        &self.meta.schedule
    }

    pub fn schedule_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.meta.schedule
    }

    pub fn errors(&self) -> &[JobError] {
        &self.meta.error
    }

    pub fn has_errors(&self) -> bool {
        !self.meta.error.is_empty()
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.meta.error.push(JobError {
            message: message.into(),
            date: Utc::now(),
        });
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Value {
        &mut self.data
    }

    pub fn set_data(&mut self, data: Value) {
        self.data = data;
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TierqError::InvalidJob(e.to_string()))
    }

    /// Value that identifies this job inside a store list.
    pub(crate) fn identity(&self) -> Result<String> {
        match &self.stored {
            Some(stored) => Ok(stored.clone()),
            None => self.to_json(),
        }
    }

    pub(crate) fn mark_stored(&mut self, value: String) {
        self.stored = Some(value);
    }
}

impl fmt::Display for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl FromStr for JobRecord {
    type Err = TierqError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_job_has_defaults() {
        let job = JobRecord::default();

        assert_eq!(job.priority(), Priority::Medium);
        assert_eq!(job.attempt_max(), DEFAULT_ATTEMPT_MAX);
        assert_eq!(job.hold_duration(), DEFAULT_HOLD_SECS);
        assert_eq!(job.stage(), None);
        assert!(job.log().is_empty());
        assert_eq!(job.data(), &json!({}));
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let mut job = JobRecord::new(json!({ "to": "user@example.com", "n": [1, 2.5, null] }))
            .with_priority(Priority::High);
        job.schedule_mut().insert("cron".into(), json!("*/5 * * * *"));
        job.set_attempt_max(5).unwrap();
        job.set_hold_duration(120);
        job.set_stage(Stage::Scheduled);
        job.set_stage(Stage::Queued);
        job.push_error("smtp timeout");

        let back = JobRecord::from_json(&job.to_json().unwrap()).unwrap();

        assert_eq!(back, job);
        assert_eq!(back.id(), job.id());
        assert_eq!(back.errors()[0].message, "smtp timeout");
        assert_eq!(back.schedule()["cron"], "*/5 * * * *");
    }

    #[test]
    fn wire_format_has_meta_and_data() {
        let mut job = JobRecord::new(json!({ "k": "v" }));
        job.set_stage(Stage::Queued);

        let value: Value = serde_json::from_str(&job.to_string()).unwrap();

        assert_eq!(value["data"], json!({ "k": "v" }));
        assert_eq!(value["meta"]["priority"], "medium");
        assert_eq!(value["meta"]["attempt"]["max"], 3);
        assert_eq!(value["meta"]["hold"]["duration"], 600);
        assert_eq!(value["meta"]["status"], "queued");
        assert_eq!(value["meta"]["log"][0]["status"], "queued");
        assert!(value["meta"]["error"].as_array().unwrap().is_empty());
    }

    #[test]
    fn revisiting_stage_appends_date() {
        let mut job = JobRecord::default();
        job.set_stage(Stage::Queued);
        job.set_stage(Stage::Processing);
        job.set_stage(Stage::Queued);
        job.set_stage(Stage::Processing);

        assert_eq!(job.log().len(), 2);
        assert_eq!(job.attempts(), 2);
        assert_eq!(job.stage(), Some(Stage::Processing));
    }

    #[test]
    fn raw_string_is_not_a_job() {
        let err = JobRecord::try_from(json!("invalid")).unwrap_err();
        assert!(matches!(err, TierqError::InvalidJob(_)));
    }

    #[test]
    fn array_is_not_a_job() {
        let err = JobRecord::try_from(json!([{ "type": "meta" }, { "type": "data" }])).unwrap_err();
        assert!(matches!(err, TierqError::InvalidJob(_)));
    }

    #[test]
    fn missing_data_defaults_to_empty_object() {
        let job = JobRecord::default();
        let mut value = serde_json::to_value(&job).unwrap();
        value.as_object_mut().unwrap().remove("data");

        let back = JobRecord::try_from(value).unwrap();
        assert_eq!(back.data(), &json!({}));
    }

    #[test]
    fn zero_attempt_max_is_rejected() {
        let mut job = JobRecord::default();
        assert!(matches!(
            job.set_attempt_max(0),
            Err(TierqError::InvalidAttempt(_))
        ));

        let mut value = serde_json::to_value(&job).unwrap();
        value["meta"]["attempt"]["max"] = json!(0);
        assert!(JobRecord::try_from(value).is_err());
    }

    #[test]
    fn status_must_appear_in_log() {
        let job = JobRecord::default();
        let mut value = serde_json::to_value(&job).unwrap();
        value["meta"]["status"] = json!("processing");

        assert!(matches!(
            JobRecord::try_from(value),
            Err(TierqError::InvalidJob(_))
        ));
    }

    #[test]
    fn terminal_priority_outside_done_is_rejected() {
        let mut job = JobRecord::default().with_priority(Priority::Success);
        job.set_stage(Stage::Queued);

        assert!(JobRecord::from_json(&job.to_json().unwrap()).is_err());
    }

    #[test]
    fn unknown_labels_fail_with_typed_errors() {
        let mut job = JobRecord::default();
        assert!(matches!(
            job.set_priority_label("urgent"),
            Err(TierqError::InvalidPriority(_))
        ));
        job.set_priority_label("low").unwrap();
        assert_eq!(job.priority(), Priority::Low);

        assert!(matches!(
            "archived".parse::<Stage>(),
            Err(TierqError::InvalidStage(_))
        ));
        assert_eq!("done".parse::<Stage>().unwrap(), Stage::Done);
    }

    #[test]
    fn identity_prefers_stored_value() {
        let mut job = JobRecord::default();
        job.set_stage(Stage::Queued);
        let stored = job.to_json().unwrap();
        job.mark_stored(stored.clone());
        job.set_stage(Stage::Processing);

        assert_eq!(job.identity().unwrap(), stored);
        assert_ne!(job.to_json().unwrap(), stored);
    }

    #[test]
    fn data_is_owned_by_the_job() {
        let mut job = JobRecord::default();
        job.data_mut()["seen"] = json!(true);
        assert_eq!(job.data()["seen"], json!(true));

        job.set_data(json!({ "fresh": 1 }));
        assert_eq!(job.into_data(), json!({ "fresh": 1 }));
    }
}
