use crate::config::ConfigError;
use crate::model::{EntityKey, TypeIdentifier};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexingError>;

#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Unknown type: {0}")]
    UnknownType(TypeIdentifier),

    #[error("Unknown entity name '{name}'. Known entity names: {}", known.join(", "))]
    UnknownEntityName { name: String, known: Vec<String> },

    #[error("Type '{0}' is not mapped for indexing")]
    UnindexedType(String),

    #[error("Type '{0}' is neither indexed nor embedded in an indexed type")]
    NotIndexable(TypeIdentifier),

    #[error("Cannot extract identifier of {type_id}: {reason}")]
    IdentifierExtraction {
        type_id: TypeIdentifier,
        reason: String,
    },

    #[error(transparent)]
    Indexing(#[from] IndexingFailure),

    #[error("Reverse association loading failed for {key}: {message}")]
    LoaderFailure { key: EntityKey, message: String },

    #[error("Flush failed: {} of {} entities not indexed", failed.len(), failed.len() + succeeded.len())]
    FlushFailed {
        failed: Vec<EntityKey>,
        succeeded: Vec<EntityKey>,
        failures: Vec<IndexingFailure>,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unit of work is {state} and no longer accepts registrations")]
    UnitOfWorkClosed { state: String },

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IndexingError {
    pub fn mapping<E: std::fmt::Display>(e: E) -> Self {
        Self::Mapping(e.to_string())
    }

    /// Failure reported when a flush aborts before submission.
    ///
    /// `pending` lists every key the flush would have indexed; all of them are
    /// reported as failed, after the key the error itself names.
    pub fn into_indexing_failure(self, pending: Vec<EntityKey>) -> IndexingFailure {
        let (mut keys, cause) = match self {
            Self::Indexing(failure) => (failure.keys, failure.cause),
            Self::LoaderFailure { key, message } => (vec![key], FailureCause::Loader(message)),
            other => (Vec::new(), FailureCause::Backend(other.to_string())),
        };
        for key in pending {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        IndexingFailure::new(keys, cause)
    }
}

/// A batch (or part of one) that did not reach the index.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Indexing failed for {} entities: {cause}", keys.len())]
pub struct IndexingFailure {
    pub keys: Vec<EntityKey>,
    pub cause: FailureCause,
}

impl IndexingFailure {
    pub fn new(keys: Vec<EntityKey>, cause: FailureCause) -> Self {
        Self { keys, cause }
    }

    pub fn category(&self) -> ErrorCategory {
        self.cause.category()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    #[error("rejected by backend: {0}")]
    Rejected(String),

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("field extraction failed: {0}")]
    Extraction(String),

    #[error("reverse association loading failed: {0}")]
    Loader(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl FailureCause {
    /// Classification only; retries belong to the backend client.
    pub fn category(&self) -> ErrorCategory {
        match self {
            FailureCause::Timeout { .. } | FailureCause::Loader(_) => ErrorCategory::Transient,
            FailureCause::Rejected(_) | FailureCause::Extraction(_) => ErrorCategory::Permanent,
            FailureCause::Backend(_) => ErrorCategory::Infrastructure,
        }
    }
}

/// Error category reported alongside failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Might succeed on a later attempt (timeouts, loader I/O)
    Transient,
    /// Will fail again with the same input (rejected document, bad extraction)
    Permanent,
    /// Backend or runtime trouble
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(IndexingError::Other(anyhow::anyhow!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
