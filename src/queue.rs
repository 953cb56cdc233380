//! Job transport for ingestion work.
//!
//! The durable queue is an external collaborator; this module pins down the
//! contract the worker pool relies on (pull-based delivery, explicit
//! ack/nack, at-least-once semantics with a bounded number of delivery
//! attempts) and provides [`MemoryQueue`], an in-process FIFO honoring the
//! same trait. Anything else that honors [`JobQueue`] (a Redis- or
//! NATS-backed transport, say) plugs into the pool unchanged.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Notify;

/// One unit of ingestion work: process this document, end to end.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub document_id: String,
    /// Delivery attempt number, 1-based. Owned by the queue, not the worker.
    pub attempt: u32,
}

impl IngestJob {
    pub fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            attempt: 1,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a job for delivery.
    async fn enqueue(&self, job: IngestJob) -> Result<()>;

    /// Next job to process. Blocks until one is available; returns `None`
    /// once the queue is closed and drained.
    async fn dequeue(&self) -> Result<Option<IngestJob>>;

    /// The job completed; the queue forgets it.
    async fn ack(&self, job: &IngestJob) -> Result<()>;

    /// The attempt failed; the queue decides whether to redeliver or
    /// abandon.
    async fn nack(&self, job: &IngestJob) -> Result<()>;
}

struct QueueState {
    jobs: VecDeque<IngestJob>,
    closed: bool,
}

/// In-process FIFO queue with bounded redelivery.
///
/// `nack` re-enqueues the job with `attempt + 1` until `max_attempts`
/// deliveries have been used, then abandons it. Redelivered jobs are
/// accepted even after [`close`](MemoryQueue::close) so an in-flight
/// failure still gets its remaining attempts during drain.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_attempts: u32,
}

impl MemoryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Stop accepting the "queue might grow" assumption: once closed and
    /// empty, `dequeue` returns `None` and consumers exit.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.notify.notify_waiters();
    }

    fn push(&self, job: IngestJob) {
        self.state.lock().unwrap().jobs.push_back(job);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: IngestJob) -> Result<()> {
        self.push(job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<IngestJob>> {
        loop {
            // Register for wakeups before checking state, otherwise a
            // notify between the check and the await is lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().unwrap();
                if let Some(job) = state.jobs.pop_front() {
                    return Ok(Some(job));
                }
                if state.closed {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    async fn ack(&self, _job: &IngestJob) -> Result<()> {
        Ok(())
    }

    async fn nack(&self, job: &IngestJob) -> Result<()> {
        if job.attempt >= self.max_attempts {
            tracing::warn!(
                document_id = %job.document_id,
                attempts = job.attempt,
                "abandoning ingestion job after max delivery attempts"
            );
            return Ok(());
        }

        self.push(IngestJob {
            document_id: job.document_id.clone(),
            attempt: job.attempt + 1,
        });
        Ok(())
    }
}
