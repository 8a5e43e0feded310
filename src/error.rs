//! Error types for the FeatureGate controller
//!
//! Every error is handled inside the worker loop: it is logged, classified
//! with [`Error::is_retryable`], and the work item is either requeued with
//! backoff or dropped. Nothing here is fatal to the process.

use thiserror::Error;

/// Main error type for FeatureGate operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Declaration or catalog cannot be resolved as written
    #[error("configuration error for {declaration}: {message}")]
    Configuration {
        /// Name of the declaration (or catalog set) at fault
        declaration: String,
        /// Description of what's wrong
        message: String,
    },

    /// The referenced declaration does not exist
    #[error("feature gate {key} not found")]
    NotFound {
        /// Work item key that was looked up
        key: String,
    },

    /// A delete notification could not be unwrapped into a FeatureGate
    #[error("couldn't get object from tombstone: {message}")]
    TombstoneDecode {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a configuration error for the named declaration
    pub fn configuration(declaration: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            declaration: declaration.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error for a work item key
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a tombstone decode error
    pub fn tombstone_decode(msg: impl Into<String>) -> Self {
        Self::TombstoneDecode {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Whether a failed work item should be requeued with backoff.
    ///
    /// Configuration errors are retried: the declaration may be fixed by a
    /// later edit and the rate limiter bounds the cost.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube { .. } | Self::Configuration { .. } => true,
            Self::NotFound { .. } | Self::TombstoneDecode { .. } | Self::Serialization { .. } => {
                false
            }
        }
    }

    /// Short label used for the `error_type` metric attribute
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kube { .. } => "kube",
            Self::Configuration { .. } => "configuration",
            Self::NotFound { .. } => "not_found",
            Self::TombstoneDecode { .. } => "tombstone_decode",
            Self::Serialization { .. } => "serialization",
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
