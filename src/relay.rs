use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::{debug, error, info, warn};

use crate::config::GithubConfig;
use crate::error::RelayError;
use crate::update::{FileReference, Update, UploadResult, UploadTarget};

#[async_trait]
pub trait FileResolver: Send + Sync {
    async fn resolve(&self, file: &FileReference) -> Result<Vec<u8>, RelayError>;
}

#[async_trait]
pub trait ContentPublisher: Send + Sync {
    async fn publish(&self, bytes: &[u8], target: &UploadTarget)
        -> Result<UploadResult, RelayError>;
}

#[async_trait]
pub trait ResultNotifier: Send + Sync {
    async fn notify(&self, chat_id: i64, text: &str) -> Result<(), RelayError>;
}

/// One accepted update, queued by the webhook handler for a worker.
pub struct Job {
    pub update: Update,
    pub file: FileReference,
}

/// Terminal state of one update's pipeline run.
#[derive(Debug)]
pub enum Outcome {
    Done(UploadResult),
    Failed(RelayError),
}

/// The upload pipeline: Received -> Resolving -> Publishing -> Notifying
/// -> Done, with Failed(reason) reachable from Resolving and Publishing.
/// Nothing here survives a restart; a redelivered update lands on the same
/// deterministic target, which is where idempotence comes from.
pub struct Pipeline<R, P, N> {
    resolver: R,
    publisher: P,
    notifier: N,
    github: GithubConfig,
    /// Set on the first GitHub auth failure; later updates fail fast
    /// instead of hammering the API with a dead token.
    auth_failed: AtomicBool,
}

impl<R, P, N> Pipeline<R, P, N>
where
    R: FileResolver,
    P: ContentPublisher,
    N: ResultNotifier,
{
    pub fn new(resolver: R, publisher: P, notifier: N, github: GithubConfig) -> Self {
        Self {
            resolver,
            publisher,
            notifier,
            github,
            auth_failed: AtomicBool::new(false),
        }
    }

    pub fn publishing_halted(&self) -> bool {
        self.auth_failed.load(Ordering::Relaxed)
    }

    pub async fn process(&self, job: Job) -> Outcome {
        let update_id = job.update.update_id;
        let chat_id = job.update.chat_id();
        debug!("Update {}: resolving {}", update_id, job.file.file_name);

        let bytes = match self.resolver.resolve(&job.file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Update {}: resolution failed: {}", update_id, e);
                self.notify_failure(chat_id, &job.file, &e).await;
                return Outcome::Failed(e);
            }
        };

        debug!("Update {}: publishing {} bytes", update_id, bytes.len());
        let target = UploadTarget::derive(
            &job.update,
            &job.file,
            &self.github.path_prefix,
            &self.github.branch,
        );
        let result = match self.publish_with_retry(&bytes, target).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Update {}: publish failed: {}", update_id, e);
                self.notify_failure(chat_id, &job.file, &e).await;
                return Outcome::Failed(e);
            }
        };

        match &result {
            UploadResult::Published { commit_sha, path } => {
                info!("Update {}: published {} as {}", update_id, path, commit_sha);
            }
            UploadResult::AlreadyPublished { path, .. } => {
                info!("Update {}: {} already published", update_id, path);
            }
        }
        self.notify_success(chat_id, &job.file, &result).await;
        Outcome::Done(result)
    }

    /// Bounded retry loop around single publish attempts. Transient
    /// failures back off exponentially with jitter; a conflict means the
    /// path is taken by foreign content, so the target is regenerated and
    /// tried again; an auth failure halts publishing process-wide.
    async fn publish_with_retry(
        &self,
        bytes: &[u8],
        mut target: UploadTarget,
    ) -> Result<UploadResult, RelayError> {
        if self.publishing_halted() {
            return Err(RelayError::Auth(
                "publishing halted after an earlier authentication failure".to_string(),
            ));
        }

        let mut backoff = ExponentialBackoff::from_millis(self.github.retry_base_ms)
            .max_delay(Duration::from_millis(self.github.retry_max_delay_ms))
            .map(jitter);
        let max_attempts = self.github.max_attempts;

        let mut attempt = 1;
        loop {
            match self.publisher.publish(bytes, &target).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_auth() => {
                    self.auth_failed.store(true, Ordering::Relaxed);
                    error!("GitHub authentication failed, halting publishing: {}", e);
                    return Err(e);
                }
                Err(e) if e.is_conflict() && attempt < max_attempts => {
                    let fresh = target.regenerate();
                    warn!(
                        "Attempt {}/{}: {} is taken, retrying as {}",
                        attempt, max_attempts, target.path, fresh.path
                    );
                    target = fresh;
                    attempt += 1;
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = backoff
                        .next()
                        .unwrap_or(Duration::from_millis(self.github.retry_max_delay_ms));
                    warn!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn notify_success(
        &self,
        chat_id: Option<i64>,
        file: &FileReference,
        result: &UploadResult,
    ) {
        let text = match result {
            UploadResult::Published { commit_sha, path } => format!(
                "Uploaded {} to {} (commit {})",
                file.file_name, path, commit_sha
            ),
            UploadResult::AlreadyPublished { path, .. } => {
                format!("{} was already uploaded to {}", file.file_name, path)
            }
        };
        self.notify(chat_id, &text).await;
    }

    async fn notify_failure(&self, chat_id: Option<i64>, file: &FileReference, err: &RelayError) {
        let text = format!("Upload of {} failed ({}): {}", file.file_name, err.kind(), err);
        self.notify(chat_id, &text).await;
    }

    /// Best-effort: a failed notification never rolls back a publish.
    async fn notify(&self, chat_id: Option<i64>, text: &str) {
        let Some(chat_id) = chat_id else { return };
        if let Err(e) = self.notifier.notify(chat_id, text).await {
            warn!("Could not notify chat {}: {}", chat_id, e);
        }
    }
}

/// Fixed worker pool draining the job queue off the HTTP path. Workers
/// stop when the sender side closes; in-flight jobs on shutdown are
/// abandoned by design.
pub fn spawn_workers<R, P, N>(
    count: usize,
    rx: mpsc::Receiver<Job>,
    pipeline: Arc<Pipeline<R, P, N>>,
) -> Vec<JoinHandle<()>>
where
    R: FileResolver + 'static,
    P: ContentPublisher + 'static,
    N: ResultNotifier + 'static,
{
    let rx = Arc::new(Mutex::new(rx));
    (0..count)
        .map(|worker| {
            let rx = Arc::clone(&rx);
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => {
                            let update_id = job.update.update_id;
                            debug!("Worker {} picked up update {}", worker, update_id);
                            pipeline.process(job).await;
                        }
                        None => break,
                    }
                }
                debug!("Worker {} shutting down", worker);
            })
        })
        .collect()
}
