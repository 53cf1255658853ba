//! Job execution error types
//!
//! Lets a job handler say whether a failure should be retried (recoverable) or
//! sent straight to the dead-letter hook (unrecoverable).

use std::fmt;

use crate::error::{AppError, ErrorMetadata};

/// Job execution error that can be either recoverable or unrecoverable
#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl TaskError {
    /// Create a new unrecoverable error
    ///
    /// Unrecoverable errors fail the job immediately without retrying. Use this for
    /// undecodable input or naming/configuration bugs.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// Create a new recoverable error
    ///
    /// Recoverable errors are retried according to the queue's retry policy.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    /// Classify an [`AppError`] using its metadata.
    pub fn from_app_error(err: AppError) -> Self {
        if err.is_recoverable() {
            Self::recoverable(err)
        } else {
            Self::unrecoverable(err)
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for TaskError {
    /// Default conversion from anyhow::Error creates a recoverable error
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Extension trait for Result to easily create unrecoverable task errors
pub trait TaskResultExt<T> {
    /// Mark this result as unrecoverable on error
    fn unrecoverable(self) -> Result<T, TaskError>;
}

impl<T, E: Into<anyhow::Error>> TaskResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, TaskError> {
        self.map_err(|e| TaskError::unrecoverable(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecoverable_error() {
        let err = TaskError::unrecoverable(anyhow::anyhow!("Undecodable image"));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("Undecodable image"));
    }

    #[test]
    fn test_from_anyhow() {
        let err: TaskError = anyhow::anyhow!("Some error").into();
        assert!(err.is_recoverable(), "Default should be recoverable");
    }

    #[test]
    fn test_from_app_error_uses_metadata() {
        let fatal = TaskError::from_app_error(AppError::Configuration("bad name".into()));
        assert!(!fatal.is_recoverable());

        let transient = TaskError::from_app_error(AppError::Storage("timeout".into()));
        assert!(transient.is_recoverable());
    }

    #[test]
    fn test_result_ext() {
        let result: Result<(), anyhow::Error> = Err(anyhow::anyhow!("Config error"));
        let task_result = result.unrecoverable();
        assert!(!task_result.unwrap_err().is_recoverable());
    }
}
