//! Remote service error taxonomy.

use thiserror::Error;

/// Errors reported by a remote key-value service.
///
/// These mirror the wire protocol statuses: 404, 409 and 410 map to the
/// first three variants; anything else unexpected is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The key does not exist on the server.
    #[error("remote key not found")]
    NotFound,

    /// The expected version did not match the server's current version.
    #[error("remote version conflict")]
    Conflict,

    /// The key is deleted on the server.
    #[error("remote key is a tombstone")]
    Tombstone,

    /// Transport failure or unexpected server response.
    #[error("unknown remote error")]
    Unknown,
}

/// Status of a key as observed from the last server round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// The key exists with live data.
    Ok,
    /// The key does not exist.
    NotFound,
    /// The presented version was stale.
    Conflict,
    /// The key is deleted.
    Tombstone,
    /// The response could not be interpreted.
    Unknown,
}

impl RemoteStatus {
    /// Converts the status into an error, `None` when the key is live.
    #[must_use]
    pub fn as_error(self) -> Option<RemoteError> {
        match self {
            Self::Ok => None,
            Self::NotFound => Some(RemoteError::NotFound),
            Self::Conflict => Some(RemoteError::Conflict),
            Self::Tombstone => Some(RemoteError::Tombstone),
            Self::Unknown => Some(RemoteError::Unknown),
        }
    }

    /// Maps an HTTP status code to a remote status.
    #[must_use]
    pub fn from_http_status(code: u16) -> Self {
        match code {
            404 => Self::NotFound,
            409 => Self::Conflict,
            410 => Self::Tombstone,
            200..=399 => Self::Ok,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(RemoteStatus::from_http_status(200), RemoteStatus::Ok);
        assert_eq!(RemoteStatus::from_http_status(304), RemoteStatus::Ok);
        assert_eq!(RemoteStatus::from_http_status(404), RemoteStatus::NotFound);
        assert_eq!(RemoteStatus::from_http_status(409), RemoteStatus::Conflict);
        assert_eq!(RemoteStatus::from_http_status(410), RemoteStatus::Tombstone);
        assert_eq!(RemoteStatus::from_http_status(500), RemoteStatus::Unknown);
        assert_eq!(RemoteStatus::from_http_status(403), RemoteStatus::Unknown);
    }

    #[test]
    fn status_error_conversion() {
        assert_eq!(RemoteStatus::Ok.as_error(), None);
        assert_eq!(
            RemoteStatus::Tombstone.as_error(),
            Some(RemoteError::Tombstone)
        );
    }
}
