//! Error types shared by the reply pipeline and its collaborators.

use thiserror::Error;

/// Failure talking to a remote API (model, storage, platform).
///
/// None of these are retried; the orchestrator turns them into the
/// apology reply.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{service} request failed: {source}")]
    Request {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{service} returned an unusable response: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },
}

impl UpstreamError {
    pub fn request(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Request { service, source }
    }

    pub fn invalid(service: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service,
            reason: reason.into(),
        }
    }
}

/// Turn a non-success response into [`UpstreamError::Status`], keeping the body for logs.
pub async fn check_status(
    service: &'static str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, UpstreamError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(UpstreamError::Status {
        service,
        status,
        body,
    })
}

/// History store failures. The pipeline never surfaces these to the user.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("history file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid history table name: {0:?}")]
    InvalidTable(String),

    #[error("history task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("model returned an empty reply")]
    EmptyReply,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("object {0} already exists")]
    AlreadyExists(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("unknown persona {0:?}")]
    UnknownPersona(String),

    #[error("invalid setting {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}
