use thiserror::Error;

/// Failure talking to the warehouse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    #[error("resource {path} not found")]
    NotFound { path: String },
    #[error("{code}: {message} (HTTP {status})")]
    Status {
        status: u16,
        code: String,
        message: String,
    },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected response from {path}: {detail}")]
    Malformed { path: String, detail: String },
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::NotFound { .. } => Some(404),
            RemoteError::Status { status, .. } => Some(*status),
            RemoteError::Transport(_) | RemoteError::Malformed { .. } => None,
        }
    }

    /// Short status label and message for user-facing text.
    pub fn summary(&self) -> (String, String) {
        match self {
            RemoteError::NotFound { path } => ("Not Found".into(), format!("{path} not found")),
            RemoteError::Status { code, message, .. } => (code.clone(), message.clone()),
            RemoteError::Transport(message) => ("Transport error".into(), message.clone()),
            RemoteError::Malformed { detail, .. } => ("Bad response".into(), detail.clone()),
        }
    }
}

/// Failure building a form schema.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("unrecognised form type {0}")]
    UnrecognisedFormType(String),
    #[error("warehouse lookup failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("invalid {kind} control: {message}")]
    Descriptor { kind: String, message: String },
}

/// Failure synchronizing a page's attributes with the warehouse.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("page {page_id} has no survey; attributes cannot be created until the survey exists")]
    MissingSurvey { page_id: u64 },
    #[error("attempt to save a survey failed: {message}")]
    SurveyCreation { status: Option<u16>, message: String },
    #[error("failed to link attribute {attribute_id} to the survey dataset: {source}")]
    Link {
        attribute_id: i64,
        #[source]
        source: RemoteError,
    },
    #[error("warehouse request failed: {0}")]
    Remote(#[from] RemoteError),
}
