use thiserror::Error;

/// Terminal error delivered through a job's completion channel.
///
/// Internal retries (text polling, blank-render re-attempts) are invisible to
/// the caller; only the final outcome surfaces here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("navigation failed: {0}")]
    Load(String),

    #[error("no load signal within {0} seconds")]
    Timeout(u64),

    #[error("rendering session crashed: {0}")]
    Crash(String),

    #[error("failed to find text: {0}")]
    TextNotFound(String),

    #[error("render failed: {0}")]
    RenderFailure(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("render queue is full ({0} jobs pending)")]
    Backpressure(usize),

    #[error("service is draining, not accepting new jobs")]
    Draining,
}

impl RenderError {
    /// HTTP status the routing layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            RenderError::Load(_) => 500,
            RenderError::Timeout(_) => 504,
            RenderError::Crash(_) => 503,
            RenderError::TextNotFound(_) => 404,
            RenderError::RenderFailure(_) => 500,
            RenderError::Capture(_) => 500,
            RenderError::Backpressure(_) => 429,
            RenderError::Draining => 503,
        }
    }

    /// Stable machine-readable kind for error payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::Load(_) => "LOAD_FAILED",
            RenderError::Timeout(_) => "TIMEOUT",
            RenderError::Crash(_) => "SESSION_CRASHED",
            RenderError::TextNotFound(_) => "TEXT_NOT_FOUND",
            RenderError::RenderFailure(_) => "RENDER_FAILED",
            RenderError::Capture(_) => "CAPTURE_FAILED",
            RenderError::Backpressure(_) => "QUEUE_FULL",
            RenderError::Draining => "DRAINING",
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_not_found_maps_to_404() {
        let err = RenderError::TextNotFound("Ready".to_string());
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.kind(), "TEXT_NOT_FOUND");
    }

    #[test]
    fn backpressure_maps_to_429() {
        assert_eq!(RenderError::Backpressure(100).status_code(), 429);
    }
}
