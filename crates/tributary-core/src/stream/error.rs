//! Error type shared by every stream stage.

/// Errors carried by a stream's terminal error signal.
///
/// One failure can fan out to many subscribers (every observer of a
/// broadcast hub, every participant of a join), so the type is `Clone`
/// and payloads are plain strings rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Upstream production failed.
    #[error("source error: {0}")]
    Source(String),

    /// An accumulator step of a scan operator failed.
    #[error("scan step failed: {0}")]
    Step(String),

    /// A join plan's projection failed.
    #[error("projection failed: {0}")]
    Projection(String),

    /// Failure raised by a user callback.
    #[error("{0}")]
    Other(String),
}

impl StreamError {
    /// Upstream production failure.
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Scan step failure.
    pub fn step(msg: impl Into<String>) -> Self {
        Self::Step(msg.into())
    }

    /// Projection failure.
    pub fn projection(msg: impl Into<String>) -> Self {
        Self::Projection(msg.into())
    }

    /// Generic failure.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e1 = StreamError::source("feed dropped");
        assert_eq!(e1.to_string(), "source error: feed dropped");

        let e2 = StreamError::step("overflow");
        assert_eq!(e2.to_string(), "scan step failed: overflow");

        let e3 = StreamError::projection("bad tuple");
        assert_eq!(e3.to_string(), "projection failed: bad tuple");

        let e4 = StreamError::other("boom");
        assert_eq!(e4.to_string(), "boom");
    }

    #[test]
    fn test_error_clone_eq() {
        let e = StreamError::source("feed dropped");
        assert_eq!(e.clone(), e);
    }
}
