use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Backend unreachable, denied, timed out or path not found.
    #[error("secret at '{path}' is not accessible: {reason}")]
    SecretNotAccessible { path: String, reason: String },
    #[error("malformed response for '{path}': {reason}")]
    MalformedResponse { path: String, reason: String },
    #[error("unrecognized engine type '{0}'")]
    UnrecognizedEngineType(String),
    #[error("write conflict on secret '{0}'")]
    WriteConflict(String),
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
}

impl Error {
    pub(crate) fn not_accessible(path: &str, reason: impl ToString) -> Self {
        Error::SecretNotAccessible {
            path: path.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(path: &str, reason: impl ToString) -> Self {
        Error::MalformedResponse {
            path: path.to_owned(),
            reason: reason.to_string(),
        }
    }

    /// True for failures that happened while reading the backend.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Error::SecretNotAccessible { .. } | Error::MalformedResponse { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
