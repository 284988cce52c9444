#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningCode {
    NearMissCandidate,
    RecoveryStrategyFailed,
    RecoveryRejected,
    RetryScheduled,
    NoTablesDetected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanWarning {
    pub code: WarningCode,
    pub message: String,
    pub locator: Option<String>,
    pub confidence: Option<f32>,
    pub attempt: Option<u32>,
}

impl ScanWarning {
    #[must_use]
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            locator: None,
            confidence: None,
            attempt: None,
        }
    }

    #[must_use]
    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}
