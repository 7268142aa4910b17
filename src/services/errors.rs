use thiserror::Error;

/// Failures of a grading or placement operation that the caller must see.
/// Sandbox failures are not in here: they degrade the code section instead.
#[derive(Debug, Error)]
pub(crate) enum GradingError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{context}: {source}")]
    Persistence {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl GradingError {
    pub(crate) fn persistence(context: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Persistence { context, source }
    }
}
