use thiserror::Error;

/// Failure taxonomy for one update's trip through the relay.
///
/// The variant decides the recovery policy: `TransientPublish` is retried
/// with backoff, `Conflict` is retried with a fresh target path, `Auth`
/// halts publishing process-wide, everything else is terminal for the
/// update it belongs to.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Rejected at ingress; never reaches the pipeline.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The gateway cannot produce the file (expired, wrong id, or too
    /// large without local mode). The file is gone, so no retry.
    #[error("file resolution failed: {0}")]
    Resolution(String),

    /// Network trouble, 5xx, or a rate limit on the GitHub side.
    #[error("transient publish failure: {0}")]
    TransientPublish(String),

    /// Something else already lives at the target path.
    #[error("target path conflict: {0}")]
    Conflict(String),

    /// GitHub rejected our credentials. Operator intervention needed.
    #[error("github authentication failure: {0}")]
    Auth(String),

    /// Result notification could not be delivered. Logged, never fatal.
    #[error("notification failure: {0}")]
    Notify(String),
}

impl RelayError {
    /// True for errors worth retrying against the same target.
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::TransientPublish(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RelayError::Conflict(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, RelayError::Auth(_))
    }

    /// Short tag for logs and the user-facing failure message.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::MalformedPayload(_) => "malformed_payload",
            RelayError::Resolution(_) => "resolution",
            RelayError::TransientPublish(_) => "transient_publish",
            RelayError::Conflict(_) => "conflict",
            RelayError::Auth(_) => "auth",
            RelayError::Notify(_) => "notify",
        }
    }
}
