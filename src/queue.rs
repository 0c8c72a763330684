// src/queue.rs
use crate::{
    AtomicStore, ErrorEvent, JobRecord, Priority, PriorityPolicy, QueueEvent, RedisStore,
    Result, Stage, StageKey, StatusReport, TierqError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{
    sync::{Semaphore, broadcast},
    task::JoinSet,
};
use tracing::{debug, error, info, instrument, warn};

/// Options for client configuration
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Only read by `QueueClient::connect`; `with_store` uses the given store.
    pub redis_url: String,
    pub key_prefix: String,
    pub queue_name: String,
    /// Store requests a batch may have in flight at once.
    pub concurrency: usize,
    pub event_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "nqueue".to_string(),
            queue_name: "default".to_string(),
            concurrency: 10,
            event_capacity: 256,
        }
    }
}

impl ClientOptions {
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Coordinates job state with the atomic store.
///
/// Every store call is a single atomic operation; the client never holds a
/// durable record of intent, so a crash mid-call leaves the job in its
/// pre-move list.
pub struct QueueClient {
    store: Arc<dyn AtomicStore>,
    options: ClientOptions,
    events: broadcast::Sender<QueueEvent>,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
}

impl QueueClient {
    /// Connect to Redis at `options.redis_url`.
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        let store = RedisStore::connect(&options.redis_url).await?;
        Ok(Self::with_store(options, Arc::new(store)))
    }

    pub fn with_store(options: ClientOptions, store: Arc<dyn AtomicStore>) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));

        info!(
            "Queue client ready on keyspace {}:{}",
            options.key_prefix, options.queue_name
        );

        Self {
            store,
            options,
            events,
            semaphore,
            closed: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// `{prefix}:{queue}`
    pub fn keyspace(&self) -> String {
        format!("{}:{}", self.options.key_prefix, self.options.queue_name)
    }

    pub fn stage_key(&self, stage: Stage) -> StageKey {
        StageKey::new(self.keyspace(), stage)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Push jobs into the `queued` stage.
    ///
    /// Each job is pushed independently; a failed push does not roll back the
    /// others. Jobs that were pushed are updated in place, failed ones are left
    /// untouched, and the first error in input order is returned.
    #[instrument(skip_all, fields(queue = %self.options.queue_name, jobs = jobs.len()))]
    pub async fn enqueue(&self, jobs: &mut [JobRecord]) -> Result<()> {
        self.push_batch("enqueue", Stage::Queued, jobs).await
    }

    pub async fn enqueue_one(&self, job: &mut JobRecord) -> Result<()> {
        self.enqueue(std::slice::from_mut(job)).await
    }

    /// Push jobs into the `scheduled` stage.
    #[instrument(skip_all, fields(queue = %self.options.queue_name, jobs = jobs.len()))]
    pub async fn schedule(&self, jobs: &mut [JobRecord]) -> Result<()> {
        self.push_batch("schedule", Stage::Scheduled, jobs).await
    }

    /// Enqueue untyped values. Any value that is not a well-formed job fails
    /// the whole batch before a store call is made.
    #[instrument(skip_all, fields(queue = %self.options.queue_name, values = values.len()))]
    pub async fn enqueue_values(&self, values: Vec<Value>) -> Result<Vec<JobRecord>> {
        let mut jobs = Vec::with_capacity(values.len());
        let mut invalid = Vec::new();

        for (index, value) in values.into_iter().enumerate() {
            match JobRecord::try_from(value) {
                Ok(job) => jobs.push(job),
                Err(e) => invalid.push(format!("item {}: {}", index, e)),
            }
        }

        if !invalid.is_empty() {
            let err = TierqError::InvalidJob(invalid.join("; "));
            return Err(self.fail("enqueue", err));
        }

        self.push_batch("enqueue", Stage::Queued, &mut jobs).await?;
        Ok(jobs)
    }

    async fn push_batch(
        &self,
        operation: &'static str,
        stage: Stage,
        jobs: &mut [JobRecord],
    ) -> Result<()> {
        self.ensure_open().map_err(|e| self.fail(operation, e))?;

        let mut prepared = Vec::with_capacity(jobs.len());
        for job in jobs.iter() {
            let mut next = job.clone();
            let value = next
                .enter(stage, job.priority())
                .and_then(|_| next.to_json())
                .map_err(|e| self.fail(operation, e))?;
            prepared.push((next, value));
        }

        let tasks = prepared
            .iter()
            .map(|(next, value)| {
                let store = Arc::clone(&self.store);
                let list = self.stage_key(stage).tier(next.priority());
                let value = value.clone();
                async move { store.push(&list, &value).await }
            })
            .collect::<Vec<_>>();

        let results = self.run_bounded(tasks).await;

        let mut first_error = None;
        for ((job, (mut next, value)), result) in jobs.iter_mut().zip(prepared).zip(results) {
            match result {
                Ok(len) => {
                    debug!(job_id = %next.id(), tier = %next.priority(), len, "Pushed job");
                    next.mark_stored(value);
                    *job = next;
                }
                Err(e) => {
                    error!(job_id = %job.id(), "Failed to push job: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(self.fail(operation, e)),
            None => {
                info!("Pushed {} jobs to {}", jobs.len(), stage);
                Ok(())
            }
        }
    }

    /// Move the oldest job of the highest non-empty tier of `source` into
    /// `destination`. `Ok(None)` means every tier was empty.
    #[instrument(skip(self), fields(queue = %self.options.queue_name))]
    pub async fn dequeue(&self, source: Stage, destination: Stage) -> Result<Option<JobRecord>> {
        self.ensure_open().map_err(|e| self.fail("dequeue", e))?;

        let destination_tiers = PriorityPolicy::tiers_for(destination);
        let tiers: Vec<Priority> = PriorityPolicy::tiers_for(source)
            .iter()
            .copied()
            .filter(|tier| destination_tiers.contains(tier))
            .collect();

        let moved = self
            .store
            .pop_move(
                &self.stage_key(source),
                &self.stage_key(destination),
                &tiers,
            )
            .await
            .map_err(|e| self.fail("dequeue", e))?;

        let Some((tier, raw)) = moved else {
            debug!("{} is drained", source);
            self.emit(QueueEvent::End);
            return Ok(None);
        };

        // The value is already in `destination`; a parse failure leaves it there.
        let mut job = JobRecord::from_json(&raw).map_err(|e| self.fail("dequeue", e))?;
        job.mark_stored(raw.clone());
        job.enter(destination, tier)
            .map_err(|e| self.fail("dequeue", e))?;

        // Rewrite the destination entry with the updated log so the job's own
        // serialized form stays its identity. On failure the pre-move value
        // remains stored and the in-memory snapshot still matches it.
        let list = self.stage_key(destination).tier(tier);
        let updated = job.to_json().map_err(|e| self.fail("dequeue", e))?;
        match self.store.remove_move(&list, &list, &raw, &updated).await {
            Ok(0) => warn!(job_id = %job.id(), "Job left {} before restamp", list),
            Ok(_) => job.mark_stored(updated),
            Err(e) => warn!(job_id = %job.id(), "Failed to restamp job in {}: {}", list, e),
        }

        debug!(job_id = %job.id(), tier = %tier, "Dequeued job");
        self.emit(QueueEvent::Data(job.clone()));
        Ok(Some(job))
    }

    /// Move `job` from `source:priority` to `destination:priority`.
    ///
    /// Returns 0 without error when the job is not in the source list.
    pub async fn pipe(
        &self,
        source: Stage,
        destination: Stage,
        priority: Priority,
        job: &mut JobRecord,
    ) -> Result<u64> {
        self.pipe_between(source, priority, destination, priority, job)
            .await
    }

    /// Move `job` from `source:source_tier` to `destination:destination_tier`.
    #[instrument(skip(self, job), fields(queue = %self.options.queue_name, job_id = %job.id()))]
    pub async fn pipe_between(
        &self,
        source: Stage,
        source_tier: Priority,
        destination: Stage,
        destination_tier: Priority,
        job: &mut JobRecord,
    ) -> Result<u64> {
        self.ensure_open().map_err(|e| self.fail("pipe", e))?;
        PriorityPolicy::check_stage(source_tier, source).map_err(|e| self.fail("pipe", e))?;

        let value = job.identity().map_err(|e| self.fail("pipe", e))?;
        let mut next = job.clone();
        let replacement = next
            .enter(destination, destination_tier)
            .and_then(|_| next.to_json())
            .map_err(|e| self.fail("pipe", e))?;

        let moved = self
            .store
            .remove_move(
                &self.stage_key(source).tier(source_tier),
                &self.stage_key(destination).tier(destination_tier),
                &value,
                &replacement,
            )
            .await
            .map_err(|e| self.fail("pipe", e))?;

        if moved == 0 {
            debug!("Job not found in {}:{}", source, source_tier);
            return Ok(0);
        }

        next.mark_stored(replacement);
        *job = next;
        debug!("Moved job to {}:{}", destination, destination_tier);
        Ok(moved)
    }

    /// Finish a processing job: `done:fail` if it recorded errors, else `done:success`.
    pub async fn close_job(&self, job: &mut JobRecord) -> Result<u64> {
        let outcome = if job.has_errors() {
            Priority::Fail
        } else {
            Priority::Success
        };

        self.pipe_between(Stage::Processing, job.priority(), Stage::Done, outcome, job)
            .await
    }

    /// Count jobs per tier for each stage in `sources`.
    #[instrument(skip(self), fields(queue = %self.options.queue_name))]
    pub async fn get_status(&self, sources: &[Stage]) -> Result<StatusReport> {
        self.ensure_open().map_err(|e| self.fail("status", e))?;

        let tasks = sources
            .iter()
            .map(|stage| {
                let store = Arc::clone(&self.store);
                let key = self.stage_key(*stage);
                async move {
                    store
                        .length(&key, PriorityPolicy::tiers_for(key.stage()))
                        .await
                }
            })
            .collect::<Vec<_>>();

        let results = self.run_bounded(tasks).await;

        let mut report = StatusReport::new();
        for (stage, result) in sources.iter().zip(results) {
            let counts = result.map_err(|e| self.fail("status", e))?;
            report.insert(*stage, counts);
        }

        self.emit(QueueEvent::Status(report.clone()));
        Ok(report)
    }

    /// Emit `End` and release the store connection. Operations issued
    /// afterwards fail with `Closed`; in-flight ones run to completion.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TierqError::Closed);
        }

        info!("Closing queue client for {}", self.keyspace());
        self.emit(QueueEvent::End);
        self.store.close().await.map_err(|e| self.fail("close", e))
    }

    /// Run every task with at most `concurrency` in flight. Results come back
    /// in input order; no task is skipped because a sibling failed.
    async fn run_bounded<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        let mut positions = HashMap::with_capacity(tasks.len());
        let mut results: Vec<Option<Result<T>>> = tasks.iter().map(|_| None).collect();

        for (index, task) in tasks.into_iter().enumerate() {
            let semaphore = Arc::clone(&self.semaphore);
            let handle = set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => task.await,
                    Err(_) => Err(TierqError::Closed),
                };
                (index, result)
            });
            positions.insert(handle.id(), index);
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => {
                    error!("Batch task failed: {}", e);
                    if let Some(index) = positions.get(&e.id()) {
                        results[*index] = Some(Err(TierqError::Task(e)));
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| Err(TierqError::Store("batch task lost".to_string())))
            })
            .collect()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(TierqError::Closed)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: QueueEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn fail(&self, operation: &'static str, err: TierqError) -> TierqError {
        error!("{} failed: {}", operation, err);
        self.emit(QueueEvent::Error(ErrorEvent::new(operation, &err)));
        err
    }
}
