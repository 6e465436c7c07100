//! Primary detector capability
//!
//! The ML/heuristic detector lives elsewhere; the chain only sees this trait.

use crate::error::DetectorError;
use crate::types::{DetectionContext, DetectionResult};
use std::time::Duration;

/// Primary detector trait
///
/// Implement this trait to plug a detector into the chain. Implementations
/// may fail with any [`DetectorError`] and may take arbitrarily long; the
/// chain applies its own timeout per invocation.
#[async_trait::async_trait]
pub trait PrimaryDetector: Send + Sync {
    /// Detect the categories a query needs
    async fn detect(
        &self,
        query: &str,
        context: Option<&DetectionContext>,
    ) -> Result<DetectionResult, DetectorError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "primary"
    }
}

/// Invoke the detector under a timeout; elapsed time becomes `DetectorError::Timeout`
pub(crate) async fn detect_with_timeout(
    detector: &dyn PrimaryDetector,
    query: &str,
    context: Option<&DetectionContext>,
    timeout: Duration,
) -> Result<DetectionResult, DetectorError> {
    match tokio::time::timeout(timeout, detector.detect(query, context)).await {
        Ok(result) => result,
        Err(_) => Err(DetectorError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    struct Hanging;

    #[async_trait::async_trait]
    impl PrimaryDetector for Hanging {
        async fn detect(
            &self,
            _query: &str,
            _context: Option<&DetectionContext>,
        ) -> Result<DetectionResult, DetectorError> {
            std::future::pending().await
        }
    }

    struct Immediate;

    #[async_trait::async_trait]
    impl PrimaryDetector for Immediate {
        async fn detect(
            &self,
            _query: &str,
            _context: Option<&DetectionContext>,
        ) -> Result<DetectionResult, DetectorError> {
            Ok(DetectionResult::from_enabled([Category::Core]))
        }

        fn name(&self) -> &str {
            "instant"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_detector_times_out() {
        let result = detect_with_timeout(&Hanging, "q", None, Duration::from_millis(150)).await;
        assert_eq!(result, Err(DetectorError::Timeout { timeout_ms: 150 }));
    }

    #[tokio::test]
    async fn fast_detector_passes_through() {
        let result = detect_with_timeout(&Immediate, "q", None, Duration::from_millis(150)).await;
        assert!(result.unwrap().categories[&Category::Core]);
        assert_eq!(Immediate.name(), "instant");
        assert_eq!(Hanging.name(), "primary");
    }
}
