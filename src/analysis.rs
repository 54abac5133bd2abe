//! Sequential, rate-limited classification of a batch of images.
//!
//! A [`BatchAnalysis`] is both the stop switch and the progress board of one
//! run: the loop publishes a [`BatchStatus`] snapshot after every image and
//! checks the cancellation token before touching the next one.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{RwLock, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    InspectorError, IResult,
    model::{ImageMetadata, LogEntry, LogKind},
    storage::AssetStore,
    vision::{Classification, Classifier},
};

/// Where the loop fetches the bytes of the next image from.
pub trait ImageSource {
    fn load(&self, id: &str) -> impl Future<Output = IResult<Vec<u8>>> + Send;
}

impl ImageSource for HashMap<String, Vec<u8>> {
    fn load(&self, id: &str) -> impl Future<Output = IResult<Vec<u8>>> + Send {
        std::future::ready(
            self.get(id)
                .cloned()
                .ok_or_else(|| InspectorError::NotFound(format!("Image {} not loaded", id))),
        )
    }
}

impl ImageSource for AssetStore {
    fn load(&self, id: &str) -> impl Future<Output = IResult<Vec<u8>>> + Send {
        async move {
            self.get(id)
                .await?
                .ok_or_else(|| InspectorError::NotFound(format!("Image {} not found in store", id)))
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub name: String,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Pending,
    Running,
    Stopped,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// 1-based position in the batch
    pub current: usize,
    pub total: usize,
    pub id: String,
    pub result: Classification,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub state: BatchState,
    pub current: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_cost_usd: f64,
    pub events: Vec<ProgressEvent>,
    pub log: Vec<LogEntry>,
    /// Set once the run has stopped or completed
    #[serde(skip)]
    pub finished_at: Option<Instant>,
}

impl Default for BatchStatus {
    fn default() -> Self {
        Self {
            state: BatchState::Pending,
            current: 0,
            total: 0,
            succeeded: 0,
            failed: 0,
            total_cost_usd: 0.0,
            events: Vec::new(),
            log: Vec::new(),
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: HashMap<String, Classification>,
    pub processed: usize,
    pub total: usize,
    pub stopped: bool,
    pub total_cost_usd: f64,
}

/// Converts a user supplied pause to a `Duration`; negative or NaN means none.
pub fn rate_duration(rate_seconds: f64) -> Duration {
    if rate_seconds.is_finite() && rate_seconds > 0.0 {
        Duration::from_secs_f64(rate_seconds)
    } else {
        Duration::ZERO
    }
}

pub struct BatchAnalysis {
    cancel: CancellationToken,
    status: watch::Sender<BatchStatus>,
}

impl Default for BatchAnalysis {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchAnalysis {
    pub fn new() -> Self {
        let (status, _) = watch::channel(BatchStatus::default());
        Self {
            cancel: CancellationToken::new(),
            status,
        }
    }

    /// Asks the loop to stop before its next image. The call in flight finishes.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            self.log("Requested stop of analysis", LogKind::Info);
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> BatchStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchStatus> {
        self.status.subscribe()
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.status.borrow().finished_at
    }

    fn finish(&self, state: BatchState) {
        self.status.send_modify(|status| {
            status.state = state;
            status.finished_at = Some(Instant::now());
        });
    }

    fn log(&self, message: impl Into<String>, kind: LogKind) {
        let entry = LogEntry::new(message, kind);
        self.status.send_modify(|status| status.log.push(entry));
    }

    fn finish_stopped(&self) {
        info!("Analysis stopped by user");
        self.log("Analysis stopped by user", LogKind::Info);
        self.finish(BatchState::Stopped);
    }

    /// Classifies `items` one at a time, pausing `rate` between calls.
    pub async fn run<C, S>(
        &self,
        classifier: &C,
        source: &S,
        items: Vec<BatchItem>,
        rate: Duration,
    ) -> BatchReport
    where
        C: Classifier + Sync,
        S: ImageSource + Sync,
    {
        let total = items.len();
        let mut report = BatchReport {
            total,
            ..BatchReport::default()
        };

        info!("Starting batch analysis of {} images", total);
        self.status.send_modify(|status| {
            status.state = BatchState::Running;
            status.total = total;
        });
        self.log(
            format!("Starting batch analysis of {} images", total),
            LogKind::Info,
        );

        for (index, item) in items.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.stopped = true;
                break;
            }

            if index > 0 && !rate.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        report.stopped = true;
                        break;
                    }
                    _ = tokio::time::sleep(rate) => {}
                }
            }

            let current = index + 1;
            self.status.send_modify(|status| status.current = current);

            let result = match source.load(&item.id).await {
                Ok(bytes) => classifier.classify(&bytes).await,
                Err(e) => {
                    warn!("Could not load {} for analysis: {}", item.id, e);
                    Classification::failure(e.to_string())
                }
            };

            let completed = result.success
                && result.comment.as_deref().is_some_and(|c| !c.is_empty());
            let cost = result.cost_usd.unwrap_or(0.0);

            if completed {
                info!("Image {}/{}: \"{}\" completed", current, total, item.name);
                self.log(
                    format!("Image {}/{}: \"{}\" completed", current, total, item.name),
                    LogKind::Info,
                );
                if cost > 0.0 {
                    self.log(format!("{:.6}", cost), LogKind::Cost);
                }
            } else {
                let reason = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Analysis failed".to_string());
                error!("Image {}: Error - {}", current, reason);
                self.log(format!("Image {}: Error - {}", current, reason), LogKind::Error);
            }

            report.processed += 1;
            report.total_cost_usd += cost;

            let event = ProgressEvent {
                current,
                total,
                id: item.id.clone(),
                result: result.clone(),
            };
            self.status.send_modify(|status| {
                if completed {
                    status.succeeded += 1;
                } else {
                    status.failed += 1;
                }
                status.total_cost_usd += cost;
                status.events.push(event);
            });

            report.results.insert(item.id.clone(), result);
        }

        if report.stopped {
            self.finish_stopped();
        } else {
            info!("Batch analysis completed");
            self.log("Batch analysis completed", LogKind::Info);
            self.finish(BatchState::Completed);
        }

        report
    }
}

/// Runs a batch over in-memory `(id, bytes)` pairs.
pub async fn analyze_batch<C>(
    classifier: &C,
    images: Vec<(String, Vec<u8>)>,
    rate_seconds: f64,
    job: &BatchAnalysis,
) -> BatchReport
where
    C: Classifier + Sync,
{
    let items = images
        .iter()
        .map(|(id, _)| BatchItem::new(id.clone(), id.clone()))
        .collect();
    let source: HashMap<String, Vec<u8>> = images.into_iter().collect();
    job.run(classifier, &source, items, rate_duration(rate_seconds))
        .await
}

/// Merges one successful finding into the stored metadata of `id`.
/// Returns false when nothing was written.
pub async fn persist_comment(store: &AssetStore, id: &str, result: &Classification) -> bool {
    let Some(comment) = result.comment.as_ref().filter(|c| result.success && !c.is_empty()) else {
        return false;
    };
    let mut metadata = match store.get_meta(id).await {
        Ok(Some(existing)) => existing,
        Ok(None) => ImageMetadata::default(),
        Err(e) => {
            warn!("Skipping comment for {}: {}", id, e);
            return false;
        }
    };
    metadata.comment = comment.clone();
    match store.put_meta(id, &metadata).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to store comment for {}: {}", id, e);
            false
        }
    }
}

/// Follows `job` and stores each finding as soon as it is published.
/// Returns once the run has stopped or completed.
pub async fn persist_progress(store: &AssetStore, job: &BatchAnalysis) -> usize {
    let mut status = job.subscribe();
    let mut seen = 0;
    let mut written = 0;

    loop {
        let (fresh, finished) = {
            let snapshot = status.borrow_and_update();
            (
                snapshot.events[seen..].to_vec(),
                matches!(snapshot.state, BatchState::Stopped | BatchState::Completed),
            )
        };
        seen += fresh.len();

        for event in &fresh {
            if persist_comment(store, &event.id, &event.result).await {
                written += 1;
            }
        }

        if finished || status.changed().await.is_err() {
            break;
        }
    }

    written
}

/// Registry of server-side batch runs.
///
/// A stopped or completed run stays queryable for `retention` after it
/// finished. Expired runs are dropped whenever a new one is registered.
#[derive(Clone)]
pub struct AnalysisJobs {
    jobs: Arc<RwLock<HashMap<Uuid, Arc<BatchAnalysis>>>>,
    retention: Duration,
}

impl Default for AnalysisJobs {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

impl AnalysisJobs {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    fn is_expired(&self, job: &BatchAnalysis, now: Instant) -> bool {
        job.finished_at()
            .is_some_and(|at| now.duration_since(at) >= self.retention)
    }

    pub async fn insert(&self, job: Arc<BatchAnalysis>) -> Uuid {
        self.evict_expired().await;
        let id = Uuid::new_v4();
        self.jobs.write().await.insert(id, job);
        id
    }

    pub async fn get(&self, id: &Uuid) -> Option<Arc<BatchAnalysis>> {
        let now = Instant::now();
        self.jobs
            .read()
            .await
            .get(id)
            .filter(|job| !self.is_expired(job, now))
            .cloned()
    }

    /// Drops finished runs older than the retention window.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !self.is_expired(job, now));
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!("Evicted {} finished batch jobs", evicted);
        }
        evicted
    }
}
