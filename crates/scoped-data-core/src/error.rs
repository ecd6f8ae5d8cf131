use serde::{Deserialize, Serialize};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Backend(BoxError),
}

impl PortError {
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    ReadFailure,
    ReadInconsistency,
    WriteFailure,
    ArchiveFailure,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::ReadFailure => "read_failure",
            Self::ReadInconsistency => "read_inconsistency",
            Self::WriteFailure => "write_failure",
            Self::ArchiveFailure => "archive_failure",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("read failure: {context}")]
    ReadFailure {
        context: String,
        #[source]
        source: BoxError,
    },
    #[error("read inconsistency: {0}")]
    ReadInconsistency(String),
    #[error("write failure: {context}")]
    WriteFailure {
        context: String,
        #[source]
        source: BoxError,
    },
    /// The live write committed but its archive snapshot did not.
    #[error("archive failure: {context}")]
    ArchiveFailure {
        context: String,
        #[source]
        source: BoxError,
    },
}

impl DataError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ReadFailure { .. } => ErrorKind::ReadFailure,
            Self::ReadInconsistency(_) => ErrorKind::ReadInconsistency,
            Self::WriteFailure { .. } => ErrorKind::WriteFailure,
            Self::ArchiveFailure { .. } => ErrorKind::ArchiveFailure,
        }
    }

    pub(crate) fn read_failure(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ReadFailure { context: context.into(), source: source.into() }
    }

    /// Map a collaborator failure on a read path.
    pub(crate) fn from_read(context: impl Into<String>, err: PortError) -> Self {
        let context = context.into();
        match err {
            PortError::NotFound(what) => Self::NotFound(format!("{context}: {what} not found")),
            PortError::Backend(source) => Self::ReadFailure { context, source },
        }
    }

    pub(crate) fn from_write(context: impl Into<String>, err: PortError) -> Self {
        Self::WriteFailure { context: context.into(), source: Box::new(err) }
    }

    pub(crate) fn from_archive(context: impl Into<String>, err: PortError) -> Self {
        Self::ArchiveFailure { context: context.into(), source: Box::new(err) }
    }
}
