use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Credentials rejected by the identity provider, or a token rejected
    /// again after one retry with fresh tokens.
    Auth(String),
    /// Any other failure. `status` is `None` for transport errors, timeouts
    /// and malformed success bodies.
    Api { status: Option<u16>, message: String },
    Io(std::io::Error),
}

impl Error {
    pub(crate) fn api(message: impl Into<String>) -> Self {
        Error::Api {
            status: None,
            message: message.into(),
        }
    }

    pub(crate) fn api_status(status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => *status,
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Auth(msg) => write!(f, "authentication error: {msg}"),
            Error::Api {
                status: Some(status),
                message,
            } => write!(f, "API error (HTTP {status}): {message}"),
            Error::Api {
                status: None,
                message,
            } => write!(f, "API error: {message}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a refresh cycle produced no snapshot. The previously published
/// snapshot stays in place in both cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The host should ask the user to re-enter credentials.
    AuthRequired(String),
    UpdateFailed(String),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshError::AuthRequired(msg) => write!(f, "re-authentication required: {msg}"),
            RefreshError::UpdateFailed(msg) => write!(f, "update failed: {msg}"),
        }
    }
}

impl std::error::Error for RefreshError {}

impl From<Error> for RefreshError {
    fn from(e: Error) -> Self {
        match e {
            Error::Auth(msg) => RefreshError::AuthRequired(msg),
            other => RefreshError::UpdateFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_auth_required() {
        let err: RefreshError = Error::Auth("token rejected".into()).into();
        assert_eq!(err, RefreshError::AuthRequired("token rejected".into()));
    }

    #[test]
    fn api_errors_map_to_update_failed() {
        let err: RefreshError = Error::api_status(503, "retries exhausted").into();
        match err {
            RefreshError::UpdateFailed(msg) => assert!(msg.contains("503")),
            other => panic!("expected UpdateFailed, got {other:?}"),
        }
    }

    #[test]
    fn status_only_for_api_errors() {
        assert_eq!(Error::api_status(404, "not found").status(), Some(404));
        assert_eq!(Error::api("timeout").status(), None);
        assert_eq!(Error::Auth("x".into()).status(), None);
    }
}
