use std::time::Duration;

use crate::error::ScanError;

/// Weights for the four implicit-table signals. They are expected to sum
/// to 1 so the combined score stays comparable to `candidate_threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalWeights {
    pub structural: f32,
    pub visual: f32,
    pub content: f32,
    pub semantic: f32,
}

impl SignalWeights {
    #[must_use]
    pub fn sum(self) -> f32 {
        self.structural + self.visual + self.content + self.semantic
    }
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            structural: 0.3,
            visual: 0.3,
            content: 0.2,
            semantic: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanOptions {
    /// Minimum combined signal score for an implicit container to survive.
    pub candidate_threshold: f32,
    /// Minimum weighted match score before a column acquires a specific type.
    pub type_confidence_floor: f32,
    pub weights: SignalWeights,
    /// Cap on implicit candidates kept after overlap filtering.
    pub max_candidates: usize,
    /// Number of scroll jumps sampled per scrollable target during recovery.
    pub scroll_steps: usize,
    /// Below this many recovered rows, the zoom and deep-scan strategies run.
    pub min_virtual_rows: usize,
    /// Maximum scan attempts before giving up with zero tables.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Multiplier applied to `retry_delay` after each empty attempt.
    pub retry_backoff: f32,
    /// Quiet period for mutation-driven rescans.
    pub debounce_quiet_period: Duration,
    /// Pause granted to the document after a scroll or zoom change.
    pub render_delay: Duration,
    /// Maximum number of segments in a structural locator.
    pub max_locator_depth: usize,
}

impl ScanOptions {
    /// Rejects configurations the pipeline cannot run meaningfully with.
    pub fn validate(&self) -> Result<(), ScanError> {
        if !(0.0..=1.0).contains(&self.candidate_threshold) {
            return Err(ScanError::InvalidOption(
                "candidate_threshold must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.type_confidence_floor) {
            return Err(ScanError::InvalidOption(
                "type_confidence_floor must be within [0, 1]".to_string(),
            ));
        }
        if (self.weights.sum() - 1.0).abs() > 0.01 {
            return Err(ScanError::InvalidOption(
                "signal weights must sum to 1".to_string(),
            ));
        }
        if self.scroll_steps == 0 {
            return Err(ScanError::InvalidOption(
                "scroll_steps must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ScanError::InvalidOption(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.retry_backoff < 1.0 {
            return Err(ScanError::InvalidOption(
                "retry_backoff must be at least 1.0".to_string(),
            ));
        }
        if self.max_locator_depth == 0 {
            return Err(ScanError::InvalidOption(
                "max_locator_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            candidate_threshold: 0.6,
            type_confidence_floor: 0.7,
            weights: SignalWeights::default(),
            max_candidates: 10,
            scroll_steps: 10,
            min_virtual_rows: 15,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            retry_backoff: 1.0,
            debounce_quiet_period: Duration::from_millis(500),
            render_delay: Duration::from_millis(100),
            max_locator_depth: 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ScanOptions, SignalWeights};

    #[test]
    fn default_options_validate() {
        ScanOptions::default()
            .validate()
            .expect("defaults should be valid");
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let options = ScanOptions {
            candidate_threshold: 1.5,
            ..ScanOptions::default()
        };
        let err = options.validate().expect_err("threshold should be rejected");
        assert!(err.to_string().contains("candidate_threshold"));
    }

    #[test]
    fn rejects_unbalanced_weights() {
        let options = ScanOptions {
            weights: SignalWeights {
                structural: 0.5,
                visual: 0.5,
                content: 0.5,
                semantic: 0.5,
            },
            ..ScanOptions::default()
        };
        let err = options.validate().expect_err("weights should be rejected");
        assert!(err.to_string().contains("sum to 1"));
    }

    #[test]
    fn rejects_zero_scroll_steps() {
        let options = ScanOptions {
            scroll_steps: 0,
            ..ScanOptions::default()
        };
        assert!(options.validate().is_err());
    }
}
