//! Structured failures surfaced by the gateway.
//!
//! Every failure a caller can observe is a [`GatewayError`]. Local problems
//! such as a single unconvertible field never reach this type; they are
//! absorbed where they happen and logged.

use std::fmt;

use thiserror::Error;

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportFailure {
    Timeout,
    HttpStatus(u16),
    Connection,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Timeout => f.write_str("timeout"),
            TransportFailure::HttpStatus(code) => write!(f, "HTTP {code}"),
            TransportFailure::Connection => f.write_str("connection error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportFailure,
    pub message: String,
}

impl TransportError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportFailure::Timeout,
            message: message.into(),
        }
    }

    pub fn http_status(code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: TransportFailure::HttpStatus(code),
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: TransportFailure::Connection,
            message: message.into(),
        }
    }

    /// Whether another attempt against the same provider may succeed.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            TransportFailure::Timeout | TransportFailure::Connection => true,
            TransportFailure::HttpStatus(code) => code == 429 || code >= 500,
        }
    }

    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.kind, TransportFailure::HttpStatus(401 | 403))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AuthError {
    pub message: String,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Coarse category of a [`GatewayError`], used for exit codes and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MappingSyntax,
    IncompleteQuery,
    InvalidParameter,
    Transport,
    Auth,
    Extraction,
    FallbackExhausted,
    UnsupportedProductType,
    UnknownProvider,
    Cancelled,
    Configuration,
}

/// One failed candidate in a fallback chain.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: GatewayError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("provider '{provider}' has an invalid mapping for '{field}': {reason}")]
    MappingSyntax {
        provider: String,
        field: String,
        reason: String,
    },

    #[error("query for provider '{provider}' is missing required parameter(s): {}", .missing.join(", "))]
    IncompleteQuery { provider: String, missing: Vec<String> },

    #[error("provider '{provider}' cannot use parameter '{field}': {reason}")]
    InvalidParameter {
        provider: String,
        field: String,
        reason: String,
    },

    #[error("provider '{provider}' request failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: TransportError,
    },

    #[error("provider '{provider}' authentication failed: {source}")]
    Auth {
        provider: String,
        #[source]
        source: AuthError,
    },

    #[error("provider '{provider}' returned an unusable response: {message}")]
    Extraction { provider: String, message: String },

    #[error("every provider failed for product type '{product_type}': {}", summarize(.attempts))]
    FallbackExhausted {
        product_type: String,
        attempts: Vec<ProviderFailure>,
    },

    #[error("no provider offers product type '{product_type}'")]
    UnsupportedProductType { product_type: String },

    #[error("unknown provider '{provider}'")]
    UnknownProvider { provider: String },

    #[error("search cancelled")]
    Cancelled { provider: Option<String> },

    #[error("configuration error: {message}")]
    Configuration { provider: Option<String>, message: String },
}

fn summarize(attempts: &[ProviderFailure]) -> String {
    attempts
        .iter()
        .map(ProviderFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::MappingSyntax { .. } => ErrorKind::MappingSyntax,
            GatewayError::IncompleteQuery { .. } => ErrorKind::IncompleteQuery,
            GatewayError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            GatewayError::Transport { .. } => ErrorKind::Transport,
            GatewayError::Auth { .. } => ErrorKind::Auth,
            GatewayError::Extraction { .. } => ErrorKind::Extraction,
            GatewayError::FallbackExhausted { .. } => ErrorKind::FallbackExhausted,
            GatewayError::UnsupportedProductType { .. } => ErrorKind::UnsupportedProductType,
            GatewayError::UnknownProvider { .. } => ErrorKind::UnknownProvider,
            GatewayError::Cancelled { .. } => ErrorKind::Cancelled,
            GatewayError::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// The provider the failure is attributed to, when there is one.
    pub fn provider(&self) -> Option<&str> {
        match self {
            GatewayError::MappingSyntax { provider, .. }
            | GatewayError::IncompleteQuery { provider, .. }
            | GatewayError::InvalidParameter { provider, .. }
            | GatewayError::Transport { provider, .. }
            | GatewayError::Auth { provider, .. }
            | GatewayError::Extraction { provider, .. }
            | GatewayError::UnknownProvider { provider } => Some(provider.as_str()),
            GatewayError::Cancelled { provider } | GatewayError::Configuration { provider, .. } => provider.as_deref(),
            GatewayError::FallbackExhausted { .. } | GatewayError::UnsupportedProductType { .. } => None,
        }
    }

    /// Whether the resolver may move on to the next candidate provider.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport { .. } | GatewayError::Auth { .. } | GatewayError::Extraction { .. }
        )
    }

    /// Maps a transport failure, turning 401/403 answers into auth failures.
    pub fn from_transport(provider: &str, source: TransportError) -> Self {
        if source.is_auth_rejection() {
            return GatewayError::Auth {
                provider: provider.to_string(),
                source: AuthError::new(source.to_string()),
            };
        }
        GatewayError::Transport {
            provider: provider.to_string(),
            source,
        }
    }

    pub fn extraction(provider: &str, message: impl Into<String>) -> Self {
        GatewayError::Extraction {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn mapping(provider: &str, field: &str, reason: impl fmt::Display) -> Self {
        GatewayError::MappingSyntax {
            provider: provider.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}
