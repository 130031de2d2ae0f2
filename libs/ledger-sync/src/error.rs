//! Error types for ledger reconstruction

use std::time::Duration;

use common::ledger::{IndexRange, IndexedRecord};

/// Errors raised by a [`LedgerSource`](crate::LedgerSource) implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Provider asked us to slow down, optionally saying for how long
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    /// Network or provider failure that may go away on retry
    Transport(String),
    /// The requested index does not exist (yet) on the source
    MissingRecord { index: u64 },
    /// Historical state is not served for this index (pruned node)
    StateUnavailable(String),
    /// Contract call reverted
    Reverted(String),
    /// Response could not be decoded
    Decode(String),
}

impl SourceError {
    /// Default retry predicate: only transient failures are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::RateLimited { .. } | SourceError::Transport(_)
        )
    }

    /// Server-suggested wait, if the provider sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify a provider error from its message.
    ///
    /// JSON-RPC providers report throttling and pruned state only through
    /// free-form text, so this is the single place that inspects strings.
    pub fn from_rpc_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("rate-limit")
            || lower.contains("too many requests")
            || lower.contains("request limit")
            || lower.contains("compute units")
        {
            return SourceError::RateLimited {
                retry_after: parse_retry_after(&lower),
                message,
            };
        }

        if lower.contains("execution reverted") || lower.contains("revert") {
            return SourceError::Reverted(message);
        }

        if lower.contains("missing trie node")
            || lower.contains("header not found")
            || lower.contains("historical state")
            || lower.contains("pruned")
        {
            return SourceError::StateUnavailable(message);
        }

        if lower.contains("decode") || lower.contains("deserialize") {
            return SourceError::Decode(message);
        }

        SourceError::Transport(message)
    }
}

/// Extract a wait hint such as `retry after 2s`, `try again in 750ms` or
/// `backoff_seconds: 3` from a lower-cased provider message.
pub fn parse_retry_after(lower: &str) -> Option<Duration> {
    const MARKERS: [&str; 5] = [
        "retry after",
        "retry-after",
        "try again in",
        "backoff_seconds",
        "backoff",
    ];

    let start = MARKERS
        .iter()
        .find_map(|m| lower.find(m).map(|pos| pos + m.len()))?;
    let rest = &lower[start..];

    let digits_start = rest.find(|c: char| c.is_ascii_digit())?;
    let tail = &rest[digits_start..];
    let digits_len = tail
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(tail.len());
    let value: f64 = tail[..digits_len].parse().ok()?;
    let unit = tail[digits_len..].trim_start();

    if unit.starts_with("ms") || unit.starts_with("milli") {
        Some(Duration::from_secs_f64(value / 1000.0))
    } else {
        Some(Duration::from_secs_f64(value))
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::RateLimited {
                retry_after: Some(wait),
                message,
            } => write!(f, "Rate limited (retry after {:?}): {}", wait, message),
            SourceError::RateLimited {
                retry_after: None,
                message,
            } => write!(f, "Rate limited: {}", message),
            SourceError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SourceError::MissingRecord { index } => {
                write!(f, "No record at index {}", index)
            }
            SourceError::StateUnavailable(msg) => {
                write!(f, "Historical state unavailable: {}", msg)
            }
            SourceError::Reverted(msg) => write!(f, "Call reverted: {}", msg),
            SourceError::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// The point a caller asked about, for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedPoint {
    Timestamp(u64),
    Index(u64),
}

impl std::fmt::Display for RequestedPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestedPoint::Timestamp(ts) => write!(f, "timestamp {}", ts),
            RequestedPoint::Index(index) => write!(f, "index {}", index),
        }
    }
}

/// Errors surfaced by the resolver, aggregator and history pager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Target timestamp lies after the current tip
    FutureTimestamp { target: u64, tip: IndexedRecord },
    /// Target index lies after the current tip
    FutureIndex { requested: u64, tip: u64 },
    /// Target precedes the tracked entity's deployment
    BeforeOrigin { requested: RequestedPoint, origin: u64 },
    /// The entity never exists in the searched range (wrong entity id)
    OriginNotFound { tip: u64 },
    /// A sub-query failed after exhausting its retries
    SourceUnavailable {
        what: String,
        range: IndexRange,
        attempts: u32,
        source: SourceError,
    },
    /// A single probe failed; passed through unmodified
    Source(SourceError),
    /// Rejected input, detected before any network call
    Validation(String),
    /// The filter set changed while this request was in flight
    Superseded,
    /// The caller cancelled the request
    Cancelled,
}

/// Plain-language message categories shown to end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    FutureDate,
    BeforeOrigin,
    Network,
    Validation,
    Misconfiguration,
    Cancelled,
}

impl ErrorCategory {
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::FutureDate => {
                "The requested date or block is in the future. Pick an earlier point."
            }
            ErrorCategory::BeforeOrigin => {
                "The requested date or block is before the token existed. Pick a later point."
            }
            ErrorCategory::Network => {
                "The ledger could not be reached or is rate limiting requests. Try again shortly."
            }
            ErrorCategory::Validation => "The filter is invalid. Check the dates and address.",
            ErrorCategory::Misconfiguration => {
                "The token could not be found on this ledger. Check the configured address."
            }
            ErrorCategory::Cancelled => "The request was cancelled.",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network)
    }
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::FutureTimestamp { .. } | LedgerError::FutureIndex { .. } => {
                ErrorCategory::FutureDate
            }
            LedgerError::BeforeOrigin { .. } => ErrorCategory::BeforeOrigin,
            LedgerError::OriginNotFound { .. } => ErrorCategory::Misconfiguration,
            LedgerError::SourceUnavailable { .. } => ErrorCategory::Network,
            LedgerError::Source(err) => match err {
                SourceError::RateLimited { .. }
                | SourceError::Transport(_)
                | SourceError::MissingRecord { .. } => ErrorCategory::Network,
                SourceError::StateUnavailable(_)
                | SourceError::Reverted(_)
                | SourceError::Decode(_) => ErrorCategory::Misconfiguration,
            },
            LedgerError::Validation(_) => ErrorCategory::Validation,
            LedgerError::Superseded | LedgerError::Cancelled => ErrorCategory::Cancelled,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.category().user_message()
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::FutureTimestamp { target, tip } => write!(
                f,
                "Timestamp {} is after the tip (index {}, timestamp {})",
                target, tip.index, tip.timestamp
            ),
            LedgerError::FutureIndex { requested, tip } => {
                write!(f, "Index {} is after the tip {}", requested, tip)
            }
            LedgerError::BeforeOrigin { requested, origin } => write!(
                f,
                "Requested {} precedes the deployment index {}",
                requested, origin
            ),
            LedgerError::OriginNotFound { tip } => {
                write!(f, "Entity does not exist at any index up to {}", tip)
            }
            LedgerError::SourceUnavailable {
                what,
                range,
                attempts,
                source,
            } => write!(
                f,
                "Source unavailable for {} over {} after {} attempts: {}",
                what, range, attempts, source
            ),
            LedgerError::Source(err) => write!(f, "{}", err),
            LedgerError::Validation(msg) => write!(f, "Invalid request: {}", msg),
            LedgerError::Superseded => write!(f, "Request superseded by a newer filter"),
            LedgerError::Cancelled => write!(f, "Request cancelled"),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::SourceUnavailable { source, .. } => Some(source),
            LedgerError::Source(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SourceError> for LedgerError {
    fn from(err: SourceError) -> Self {
        LedgerError::Source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        let err = SourceError::from_rpc_message("HTTP error 429 with body: Too Many Requests");
        assert!(matches!(err, SourceError::RateLimited { .. }));
        assert!(err.is_retryable());

        let err = SourceError::from_rpc_message(
            "server returned an error response: error code -32005: rate limit exceeded, retry after 2s",
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(
            parse_retry_after("too many requests, try again in 750ms"),
            Some(Duration::from_millis(750))
        );
        assert_eq!(
            parse_retry_after("{\"backoff_seconds\": 3}"),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            parse_retry_after("retry-after: 1.5"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_after("rate limited"), None);
    }

    #[test]
    fn test_non_retryable_classification() {
        let err = SourceError::from_rpc_message("execution reverted");
        assert!(matches!(err, SourceError::Reverted(_)));
        assert!(!err.is_retryable());

        let err = SourceError::from_rpc_message("missing trie node abc (path )");
        assert!(matches!(err, SourceError::StateUnavailable(_)));
        assert!(!err.is_retryable());

        let err = SourceError::from_rpc_message("connection reset by peer");
        assert!(matches!(err, SourceError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_categories() {
        let tip = IndexedRecord {
            index: 10,
            timestamp: 100,
        };
        assert_eq!(
            LedgerError::FutureTimestamp { target: 101, tip }.category(),
            ErrorCategory::FutureDate
        );
        assert_eq!(
            LedgerError::BeforeOrigin {
                requested: RequestedPoint::Index(1),
                origin: 5
            }
            .category(),
            ErrorCategory::BeforeOrigin
        );
        assert_eq!(
            LedgerError::OriginNotFound { tip: 10 }.category(),
            ErrorCategory::Misconfiguration
        );
        assert!(!LedgerError::OriginNotFound { tip: 10 }.is_retryable());

        let unavailable = LedgerError::SourceUnavailable {
            what: "events[Transfer]".to_string(),
            range: IndexRange::new(1, 5),
            attempts: 3,
            source: SourceError::Transport("timeout".to_string()),
        };
        assert!(unavailable.is_retryable());
        assert!(unavailable.to_string().contains("[1, 5]"));
        assert_eq!(
            LedgerError::Validation("start after end".into()).category(),
            ErrorCategory::Validation
        );
    }
}
