//! Errors surfaced by a triage run.
//!
//! Component errors ([`DumpError`], [`TrackerError`], [`ConfigError`]) are
//! folded into [`TriageError`], which is what the batch processor reports and
//! what the command line turns into an exit status.

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::dump::DumpError;
use crate::tracker::TrackerError;

/// An error that stops either a single dump or the whole run.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    /// Malformed or missing configuration. Fatal, raised before any dump is read.
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(#[from] ConfigError),
    /// The tracker rejected the operator's credentials.
    #[error("the tracker rejected the supplied credentials")]
    AuthenticationFailed,
    /// The tracker has no project with this identifier.
    #[error("no tracker project named {0:?}")]
    ProjectNotFound(String),
    /// A single dump could not be read. Recovered per dump.
    #[error("couldn't read {}: {source}", path.display())]
    DumpUnreadable {
        path: PathBuf,
        #[source]
        source: DumpError,
    },
    /// Issue creation (or another tracker request) failed. Recovered per dump.
    #[error("tracker unavailable: {0}")]
    TrackerUnavailable(TrackerError),
}

impl TriageError {
    /// Wrap a reader failure with the identity of the dump it happened on.
    pub fn unreadable(path: impl Into<PathBuf>, source: DumpError) -> Self {
        TriageError::DumpUnreadable {
            path: path.into(),
            source,
        }
    }

    /// Short, stable name of the error kind, used as a log prefix.
    pub fn name(&self) -> &'static str {
        match self {
            TriageError::ConfigurationInvalid(_) => "ConfigurationInvalid",
            TriageError::AuthenticationFailed => "AuthenticationFailed",
            TriageError::ProjectNotFound(_) => "ProjectNotFound",
            TriageError::DumpUnreadable { .. } => "DumpUnreadable",
            TriageError::TrackerUnavailable(_) => "TrackerUnavailable",
        }
    }

    /// Errors that must stop the run instead of being attributed to one dump.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TriageError::ConfigurationInvalid(_)
                | TriageError::AuthenticationFailed
                | TriageError::ProjectNotFound(_)
        )
    }
}

impl From<TrackerError> for TriageError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::AuthenticationFailed => TriageError::AuthenticationFailed,
            TrackerError::ProjectNotFound(project) => TriageError::ProjectNotFound(project),
            other => TriageError::TrackerUnavailable(other),
        }
    }
}
