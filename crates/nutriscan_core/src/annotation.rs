//! crates/nutriscan_core/src/annotation.rs
//!
//! Background AI annotation. Products that were stored without a verdict are
//! queued here by id and annotated by a worker task, so the scan itself never
//! waits on the AI service.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{AiAnalysisResult, RawProductData};
use crate::resolver::ProductResolver;

/// A request to annotate one stored product.
#[derive(Debug, Clone)]
pub struct AnnotationJob {
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub raw: Option<RawProductData>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationStatus {
    Pending,
    Completed(AiAnalysisResult),
    /// The job ran but produced no verdict; enqueueing again retries it.
    Unavailable,
}

/// Jobs annotated at the same time. Further jobs wait in the queue.
pub const MAX_CONCURRENT_ANNOTATIONS: usize = 4;

/// `Unavailable` entries kept for status reads; the oldest are dropped first.
const MAX_UNAVAILABLE: usize = 1024;

/// Published on the completion channel when a job settles.
#[derive(Debug, Clone)]
pub struct AnnotationEvent {
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub status: AnnotationStatus,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("annotation queue is full")]
    QueueFull,
    #[error("annotation worker has stopped")]
    Closed,
}

/// Per-product job state. Completed jobs are dropped once settled since their
/// verdict now lives in the store.
#[derive(Default)]
struct StatusBook {
    entries: HashMap<Uuid, AnnotationStatus>,
    unavailable: VecDeque<Uuid>,
}

impl StatusBook {
    /// Marks a product pending. False when a job for it is already pending.
    fn mark_pending(&mut self, product_id: Uuid) -> bool {
        if matches!(self.entries.get(&product_id), Some(AnnotationStatus::Pending)) {
            return false;
        }
        self.unavailable.retain(|id| *id != product_id);
        self.entries.insert(product_id, AnnotationStatus::Pending);
        true
    }

    fn forget(&mut self, product_id: Uuid) {
        self.entries.remove(&product_id);
    }

    fn settle(&mut self, product_id: Uuid, status: &AnnotationStatus) {
        match status {
            AnnotationStatus::Unavailable => {
                self.entries.insert(product_id, AnnotationStatus::Unavailable);
                self.unavailable.push_back(product_id);
                while self.unavailable.len() > MAX_UNAVAILABLE {
                    if let Some(oldest) = self.unavailable.pop_front() {
                        self.entries.remove(&oldest);
                    }
                }
            }
            AnnotationStatus::Completed(_) | AnnotationStatus::Pending => self.forget(product_id),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle to the annotation queue. Cheap to clone.
#[derive(Clone)]
pub struct AnnotationQueue {
    sender: mpsc::Sender<AnnotationJob>,
    statuses: Arc<Mutex<StatusBook>>,
    events: broadcast::Sender<AnnotationEvent>,
}

impl AnnotationQueue {
    /// Starts the worker and returns the queue handle with the worker's join handle.
    ///
    /// The worker stops taking jobs when `shutdown` is cancelled or every handle
    /// is dropped. Jobs already running are finished before the join handle
    /// resolves; jobs still queued are dropped.
    pub fn spawn(
        resolver: Arc<ProductResolver>,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (events, _) = broadcast::channel(capacity.max(1) * 2);
        let statuses = Arc::new(Mutex::new(StatusBook::default()));

        let worker = tokio::spawn(run_worker(
            resolver,
            receiver,
            statuses.clone(),
            events.clone(),
            shutdown,
        ));

        (
            Self {
                sender,
                statuses,
                events,
            },
            worker,
        )
    }

    /// Queues a product for annotation. A product that is already pending is not queued twice.
    pub async fn enqueue(&self, job: AnnotationJob) -> Result<(), EnqueueError> {
        let product_id = job.product_id;
        if !self.statuses.lock().await.mark_pending(product_id) {
            return Ok(());
        }

        if let Err(e) = self.sender.try_send(job) {
            self.statuses.lock().await.forget(product_id);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            });
        }
        Ok(())
    }

    /// Status of a pending or failed job for `product_id`.
    ///
    /// `None` once a job completes; the verdict is then read from the store.
    pub async fn status(&self, product_id: Uuid) -> Option<AnnotationStatus> {
        self.statuses.lock().await.entries.get(&product_id).cloned()
    }

    /// Number of products with a tracked status.
    pub async fn tracked(&self) -> usize {
        self.statuses.lock().await.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnnotationEvent> {
        self.events.subscribe()
    }
}

async fn run_worker(
    resolver: Arc<ProductResolver>,
    mut receiver: mpsc::Receiver<AnnotationJob>,
    statuses: Arc<Mutex<StatusBook>>,
    events: broadcast::Sender<AnnotationEvent>,
    shutdown: CancellationToken,
) {
    info!("Annotation worker started.");
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => report(joined),
            job = receiver.recv(), if in_flight.len() < MAX_CONCURRENT_ANNOTATIONS => match job {
                Some(job) => {
                    in_flight.spawn(annotate(
                        resolver.clone(),
                        job,
                        statuses.clone(),
                        events.clone(),
                    ));
                }
                None => break,
            },
        }
    }

    // Stop intake; queued jobs never started, so their pending marks go too.
    receiver.close();
    let mut dropped = 0usize;
    while let Ok(job) = receiver.try_recv() {
        statuses.lock().await.forget(job.product_id);
        dropped += 1;
    }
    if dropped > 0 {
        warn!(dropped, "Dropped queued annotations on shutdown.");
    }

    if !in_flight.is_empty() {
        info!(running = in_flight.len(), "Waiting for in-flight annotations.");
    }
    while let Some(joined) = in_flight.join_next().await {
        report(joined);
    }

    if shutdown.is_cancelled() {
        info!("Annotation worker cancelled.");
    } else {
        error!("Annotation queue closed; worker exiting.");
    }
}

async fn annotate(
    resolver: Arc<ProductResolver>,
    job: AnnotationJob,
    statuses: Arc<Mutex<StatusBook>>,
    events: broadcast::Sender<AnnotationEvent>,
) {
    let AnnotationJob {
        product_id,
        user_id,
        raw,
    } = job;

    let status = match resolver
        .fetch_or_generate_ai_analysis(product_id, user_id, raw.as_ref())
        .await
    {
        Some(analysis) => AnnotationStatus::Completed(analysis),
        None => {
            warn!(%product_id, "annotation produced no verdict");
            AnnotationStatus::Unavailable
        }
    };

    statuses.lock().await.settle(product_id, &status);
    // No subscribers is fine; statuses stay readable.
    let _ = events.send(AnnotationEvent {
        product_id,
        user_id,
        status,
    });
}

fn report(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!("Annotation task failed: {}", e);
    }
}
