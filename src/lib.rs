// src/lib.rs
//! tierq: a multi-tier priority job queue on Redis
//!
//! Jobs move through ordered stages (scheduled, queued, processing, done) and,
//! within each stage, through fixed priority tiers (critical, high, medium,
//! low). Every move between stages is a single atomic store operation, so a
//! job is always in exactly one list or, for the duration of that operation,
//! in none.

pub mod consumer;
pub mod error;
pub mod events;
pub mod job;
pub mod lua;
pub mod memory;
pub mod priority;
pub mod queue;
pub mod redis_store;
pub mod status;
pub mod store;
pub mod transition;

pub use consumer::{Consumer, ConsumerBuilder, ConsumerConfig};
pub use error::{Result, TierqError};
pub use events::{ErrorEvent, QueueEvent};
pub use job::{JobError, JobId, JobRecord, Stage};
pub use memory::MemoryStore;
pub use priority::{Priority, PriorityPolicy};
pub use queue::{ClientOptions, QueueClient};
pub use redis_store::RedisStore;
pub use status::StatusReport;
pub use store::{AtomicStore, ListKey, StageKey};
pub use transition::{TransitionEntry, TransitionLog};

// Re-export commonly used types
pub use async_trait::async_trait;
