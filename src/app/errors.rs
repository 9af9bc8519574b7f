/// Failure talking to the embedding provider or the catalog store.
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("{service} responded with {status}: {body}")]
    Status {
        service: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned a malformed response: {reason}")]
    Malformed {
        service: &'static str,
        reason: String,
    },
}

impl UpstreamError {
    pub fn transport(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| UpstreamError::Transport { service, source }
    }

    pub fn malformed(service: &'static str, reason: impl Into<String>) -> Self {
        UpstreamError::Malformed {
            service,
            reason: reason.into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Request body must be a JSON object: {0}")]
    MalformedRequest(String),

    #[error("Query must be at least 2 characters")]
    QueryTooShort,

    #[error("missing configuration: {0}")]
    Misconfigured(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

impl AppError {
    /// Message safe to show to a client. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::MethodNotAllowed | AppError::QueryTooShort => self.to_string(),
            AppError::MalformedRequest(_) => "Request body must be a JSON object".to_string(),
            AppError::Misconfigured(_) => "Service is not configured".to_string(),
            AppError::Upstream(_) => "Service unavailable".to_string(),
        }
    }
}
