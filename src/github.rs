use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::config::GithubConfig;
use crate::error::RelayError;
use crate::relay::ContentPublisher;
use crate::update::{UploadResult, UploadTarget};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("ghrelay/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ExistingContent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    commit: CommitInfo,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    sha: String,
}

/// Client for the repository contents API. One call per upload: probe the
/// target path for the idempotent-replay case, then PUT the blob.
pub struct GithubClient {
    client: reqwest::Client,
    config: GithubConfig,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn contents_url(&self, path: &str) -> String {
        format!("{}/repos/{}/contents/{}", API_BASE, self.config.repo, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("token {}", self.config.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    /// Blob sha of the object at `path` on the target branch, if any.
    async fn probe(&self, target: &UploadTarget) -> Result<Option<String>, RelayError> {
        let url = self.contents_url(&target.path);
        let response = self
            .request(self.client.get(&url))
            .query(&[("ref", target.branch.as_str())])
            .send()
            .await
            .map_err(|e| RelayError::TransientPublish(format!("contents probe failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_success() {
            let existing: ExistingContent = response.json().await.map_err(|e| {
                RelayError::TransientPublish(format!("contents probe returned invalid JSON: {e}"))
            })?;
            return Ok(Some(existing.sha));
        }
        let rate_limited = is_rate_limited(&response);
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), rate_limited, &body))
    }
}

#[async_trait]
impl ContentPublisher for GithubClient {
    async fn publish(
        &self,
        bytes: &[u8],
        target: &UploadTarget,
    ) -> Result<UploadResult, RelayError> {
        let our_sha = git_blob_sha(bytes);

        // Telegram may redeliver an update; the deterministic path plus
        // this probe makes the second delivery a no-op.
        if let Some(existing_sha) = self.probe(target).await? {
            if existing_sha == our_sha {
                info!("{} already holds this content, skipping", target.path);
                return Ok(UploadResult::AlreadyPublished {
                    blob_sha: existing_sha,
                    path: target.path.clone(),
                });
            }
            return Err(RelayError::Conflict(format!(
                "{} exists with different content ({} != {})",
                target.path, existing_sha, our_sha
            )));
        }

        let url = self.contents_url(&target.path);
        debug!("PUT {} ({} bytes)", url, bytes.len());
        let payload = serde_json::json!({
            "message": target.commit_message,
            "content": base64::engine::general_purpose::STANDARD.encode(bytes),
            "branch": target.branch,
        });
        let response = self
            .request(self.client.put(&url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::TransientPublish(format!("contents PUT failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let put: PutResponse = response.json().await.map_err(|e| {
                RelayError::TransientPublish(format!("contents PUT returned invalid JSON: {e}"))
            })?;
            return Ok(UploadResult::Published {
                commit_sha: put.commit.sha,
                path: target.path.clone(),
            });
        }
        let rate_limited = is_rate_limited(&response);
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), rate_limited, &body))
    }
}

fn is_rate_limited(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "0")
        .unwrap_or(false)
}

/// Map a GitHub error status to the relay taxonomy. Rate-limit 403s are
/// transient; any other 401/403 means the token is bad and publishing
/// must halt.
fn classify_status(status: u16, rate_limited: bool, body: &str) -> RelayError {
    match status {
        401 => RelayError::Auth(format!("GitHub rejected the token (401): {body}")),
        403 if rate_limited || body.contains("rate limit") => {
            RelayError::TransientPublish(format!("GitHub rate limit (403): {body}"))
        }
        403 => RelayError::Auth(format!("GitHub forbade the request (403): {body}")),
        429 => RelayError::TransientPublish(format!("GitHub rate limit (429): {body}")),
        409 | 422 => RelayError::Conflict(format!("GitHub reported a conflict ({status}): {body}")),
        _ => RelayError::TransientPublish(format!("GitHub error ({status}): {body}")),
    }
}

/// Git blob sha of `bytes`: SHA-1 over "blob <len>\0" + content. This is
/// the `sha` the contents API reports for a file, so comparing against it
/// detects an identical earlier upload without re-downloading anything.
pub fn git_blob_sha(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", bytes.len()).as_bytes());
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
