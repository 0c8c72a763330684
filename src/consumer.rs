// src/consumer.rs
use crate::{JobRecord, QueueClient, Stage, TierqError};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::{Duration, MissedTickBehavior, interval},
};
use tracing::{debug, error, info, warn};

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub source: Stage,
    pub destination: Stage,
    pub poll_interval: Duration,
    /// Pause after a failed dequeue before polling again.
    pub error_backoff: Duration,
    /// Jobs buffered for the receiver before the loop waits.
    pub buffer: usize,
    pub stop_when_drained: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            source: Stage::Queued,
            destination: Stage::Processing,
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            buffer: 16,
            stop_when_drained: false,
        }
    }
}

/// Builder for a background dequeue loop
pub struct ConsumerBuilder {
    config: ConsumerConfig,
    client: Arc<QueueClient>,
}

impl ConsumerBuilder {
    pub fn new(client: Arc<QueueClient>) -> Self {
        Self {
            config: ConsumerConfig::default(),
            client,
        }
    }

    pub fn with_source(mut self, stage: Stage) -> Self {
        self.config.source = stage;
        self
    }

    pub fn with_destination(mut self, stage: Stage) -> Self {
        self.config.destination = stage;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.config.error_backoff = backoff;
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.config.buffer = buffer;
        self
    }

    pub fn stop_when_drained(mut self, stop: bool) -> Self {
        self.config.stop_when_drained = stop;
        self
    }

    /// Start the loop. Dequeued jobs arrive on the returned receiver; the loop
    /// waits while the receiver is full so no delivered job is dropped.
    pub fn spawn(self) -> (Consumer, mpsc::Receiver<JobRecord>) {
        Consumer::spawn(self.config, self.client)
    }
}

/// Repeatedly moves jobs from `source` to `destination` and hands them out.
///
/// Store failures are logged and published as `Error` events by the client;
/// the loop keeps polling after `error_backoff`.
pub struct Consumer {
    config: ConsumerConfig,
    handle: Option<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    is_shutting_down: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
}

impl Consumer {
    fn spawn(config: ConsumerConfig, client: Arc<QueueClient>) -> (Self, mpsc::Receiver<JobRecord>) {
        let (jobs_tx, jobs_rx) = mpsc::channel(config.buffer.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let is_shutting_down = Arc::new(AtomicBool::new(false));
        let delivered = Arc::new(AtomicU64::new(0));

        info!(
            "Starting consumer {} -> {} on {}",
            config.source,
            config.destination,
            client.keyspace()
        );

        let handle = tokio::spawn(Self::run(
            config.clone(),
            client,
            jobs_tx,
            shutdown_tx.subscribe(),
            Arc::clone(&is_shutting_down),
            Arc::clone(&delivered),
        ));

        let consumer = Self {
            config,
            handle: Some(handle),
            shutdown_tx,
            is_shutting_down,
            delivered,
        };
        (consumer, jobs_rx)
    }

    async fn run(
        config: ConsumerConfig,
        client: Arc<QueueClient>,
        jobs_tx: mpsc::Sender<JobRecord>,
        mut shutdown_rx: broadcast::Receiver<()>,
        is_shutting_down: Arc<AtomicBool>,
        delivered: Arc<AtomicU64>,
    ) {
        let mut ticker = interval(config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'poll: loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.recv() => break 'poll,
            }

            // Drain while jobs are available, then wait for the next tick.
            loop {
                if is_shutting_down.load(Ordering::SeqCst) || client.is_closed() {
                    break 'poll;
                }

                match client.dequeue(config.source, config.destination).await {
                    Ok(Some(job)) => {
                        let job_id = job.id();
                        debug!(job_id = %job_id, "Consumer received job");
                        tokio::select! {
                            sent = jobs_tx.send(job) => {
                                if sent.is_err() {
                                    warn!("Job receiver dropped, stopping consumer");
                                    break 'poll;
                                }
                                delivered.fetch_add(1, Ordering::SeqCst);
                            }
                            _ = shutdown_rx.recv() => {
                                // The job stays in the destination stage for recovery.
                                warn!(
                                    job_id = %job_id,
                                    "Stopped before handing out job, left in {}",
                                    config.destination
                                );
                                break 'poll;
                            }
                        }
                    }
                    Ok(None) => {
                        if config.stop_when_drained {
                            info!("{} drained, stopping consumer", config.source);
                            break 'poll;
                        }
                        break;
                    }
                    Err(TierqError::Closed) => break 'poll,
                    Err(e) => {
                        error!("Failed to dequeue: {}", e);
                        tokio::time::sleep(config.error_backoff).await;
                        break;
                    }
                }
            }
        }

        info!("Consumer loop terminated");
    }

    /// Ask the loop to stop. An in-flight dequeue completes first; a job still
    /// waiting for buffer space is not handed out and stays in `destination`.
    pub fn stop(&self) {
        info!(
            "Stop requested for consumer {} -> {}",
            self.config.source, self.config.destination
        );
        self.is_shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for the loop to exit.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Consumer task failed: {}", e);
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientOptions, MemoryStore, Priority};

    fn client() -> Arc<QueueClient> {
        let options = ClientOptions::default().with_queue_name("consumer");
        Arc::new(QueueClient::with_store(options, Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn drains_in_priority_order_then_stops() {
        let client = client();
        let mut jobs = vec![
            JobRecord::default().with_priority(Priority::Low),
            JobRecord::default().with_priority(Priority::Critical),
            JobRecord::default().with_priority(Priority::Medium),
        ];
        client.enqueue(&mut jobs).await.unwrap();

        let (consumer, mut rx) = ConsumerBuilder::new(Arc::clone(&client))
            .with_poll_interval(Duration::from_millis(5))
            .stop_when_drained(true)
            .spawn();

        let mut received = Vec::new();
        while let Some(job) = rx.recv().await {
            received.push(job.priority());
        }

        assert_eq!(
            received,
            vec![Priority::Critical, Priority::Medium, Priority::Low]
        );
        assert_eq!(consumer.delivered(), 3);
        consumer.join().await;
    }

    #[tokio::test]
    async fn stop_ends_idle_loop() {
        let client = client();
        let (consumer, mut rx) = ConsumerBuilder::new(client)
            .with_poll_interval(Duration::from_millis(5))
            .spawn();
        assert!(consumer.is_running());

        consumer.stop();

        assert!(rx.recv().await.is_none());
        consumer.join().await;
    }

    #[tokio::test]
    async fn stop_interrupts_wait_on_full_buffer() {
        let client = client();
        let mut jobs: Vec<_> = (0..3).map(|_| JobRecord::default()).collect();
        client.enqueue(&mut jobs).await.unwrap();

        let (consumer, _rx) = ConsumerBuilder::new(Arc::clone(&client))
            .with_poll_interval(Duration::from_millis(5))
            .with_buffer(1)
            .spawn();

        // one job fills the buffer, the second waits for space
        while client.get_status(&[Stage::Processing]).await.unwrap().total() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        consumer.stop();
        let joined = tokio::time::timeout(Duration::from_secs(2), consumer.join()).await;
        assert!(joined.is_ok());

        let report = client
            .get_status(&[Stage::Queued, Stage::Processing])
            .await
            .unwrap();
        assert_eq!(report.stage_total(Stage::Queued), 1);
        assert_eq!(report.stage_total(Stage::Processing), 2);
    }

    #[tokio::test]
    async fn closing_client_ends_loop() {
        let client = client();
        let (consumer, mut rx) = ConsumerBuilder::new(Arc::clone(&client))
            .with_poll_interval(Duration::from_millis(5))
            .spawn();

        client.close().await.unwrap();

        assert!(rx.recv().await.is_none());
        consumer.join().await;
    }
}
