//! Threshold schedule for iterative flagging.
//!
//! Each iteration of a strategy detects at a threshold that is a power of the
//! step factor times the base threshold. The largest power comes first, so the
//! most conservative pass runs before the baseline has been removed.

use crate::error::FlagError;

/// Descending threshold multipliers and the base they scale.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSequence {
    base_threshold: f64,
    factors: Vec<f64>,
}

impl ThresholdSequence {
    /// Build the multipliers `step^k` for `k = iteration_count - 1` down to 1.
    ///
    /// An iteration count of 1 gives an empty sequence: detection then happens
    /// once, directly at `base_threshold`.
    ///
    /// # Examples
    /// ```rust
    /// use flagger::detection::ThresholdSequence;
    ///
    /// let seq = ThresholdSequence::new(1.4, 2.0, 3).unwrap();
    /// assert_eq!(seq.factors(), &[4.0, 2.0]);
    /// ```
    ///
    /// # Errors
    /// `FlagError::InvalidConfig` when `iteration_count < 1`, `step_factor <= 0`
    /// or the base threshold is not a positive finite number.
    pub fn new(
        base_threshold: f64,
        step_factor: f64,
        iteration_count: usize,
    ) -> Result<Self, FlagError> {
        if iteration_count < 1 {
            return Err(FlagError::InvalidConfig(
                "iteration count must be at least 1".to_string(),
            ));
        }
        if !(step_factor.is_finite() && step_factor > 0.0) {
            return Err(FlagError::InvalidConfig(format!(
                "threshold step factor must be positive, got {step_factor}"
            )));
        }
        if !(base_threshold.is_finite() && base_threshold > 0.0) {
            return Err(FlagError::InvalidConfig(format!(
                "base threshold must be positive, got {base_threshold}"
            )));
        }

        let factors = (1..iteration_count)
            .rev()
            .map(|k| step_factor.powi(k as i32))
            .collect();

        Ok(Self {
            base_threshold,
            factors,
        })
    }

    pub fn base_threshold(&self) -> f64 {
        self.base_threshold
    }

    /// Multipliers in application order.
    pub fn factors(&self) -> &[f64] {
        &self.factors
    }

    /// `factor * base_threshold` for every multiplier, in application order.
    pub fn effective_thresholds(&self) -> Vec<f64> {
        self.factors
            .iter()
            .map(|f| f * self.base_threshold)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}
