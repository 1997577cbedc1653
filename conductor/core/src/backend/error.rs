//! Provider errors
//!
//! Every backend failure is normalized into exactly one [`ProviderError`]
//! variant. The `Display` text is what the client sees, so it is always a
//! human-readable sentence and never a debug dump.

use std::fmt;

/// Failure category of a generation call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// Missing, invalid, or rejected credential
    Auth,
    /// Quota or rate limit exhausted
    Quota,
    /// Backend unreachable
    Network,
    /// Anything else
    Unknown,
}

impl ProviderErrorKind {
    /// Short classification string for logging
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth_error",
            Self::Quota => "quota_error",
            Self::Network => "network_error",
            Self::Unknown => "unknown_error",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified generation failure, carrying the message shown to the client
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Credential problem
    #[error("{0}")]
    Auth(String),
    /// Quota or rate limit
    #[error("{0}")]
    Quota(String),
    /// Connectivity problem
    #[error("{0}")]
    Network(String),
    /// Unclassified failure; the original message is preserved
    #[error("{0}")]
    Unknown(String),
}

impl ProviderError {
    /// Build an error of the given kind
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ProviderErrorKind::Auth => Self::Auth(message),
            ProviderErrorKind::Quota => Self::Quota(message),
            ProviderErrorKind::Network => Self::Network(message),
            ProviderErrorKind::Unknown => Self::Unknown(message),
        }
    }

    /// Failure category
    #[must_use]
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Auth(_) => ProviderErrorKind::Auth,
            Self::Quota(_) => ProviderErrorKind::Quota,
            Self::Network(_) => ProviderErrorKind::Network,
            Self::Unknown(_) => ProviderErrorKind::Unknown,
        }
    }

    /// Message shown to the client
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::Auth(m) | Self::Quota(m) | Self::Network(m) | Self::Unknown(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            ProviderErrorKind::Auth,
            ProviderErrorKind::Quota,
            ProviderErrorKind::Network,
            ProviderErrorKind::Unknown,
        ] {
            let err = ProviderError::new(kind, "boom");
            assert_eq!(err.kind(), kind);
            assert_eq!(err.user_message(), "boom");
            assert_eq!(err.to_string(), "boom");
        }
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(ProviderErrorKind::Quota.as_str(), "quota_error");
        assert_eq!(ProviderErrorKind::Network.to_string(), "network_error");
    }
}
