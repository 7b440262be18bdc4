//! Fixed-form pacing
//!
//! Produces a stimulus level by linear interpolation over a precomputed
//! `(time, value)` series. Outside the series' range the level clamps to the
//! nearest endpoint. The level is treated as continuously varying: the
//! simulation samples it afresh at every RHS evaluation, and no
//! discontinuity events are generated.

use super::PacingError;

/// Fixed-form pacing over a time series.
pub struct FixedPacing {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl FixedPacing {
    /// Ingest and validate a time series. Times must be finite and strictly
    /// increasing, and at least one sample is required.
    pub fn populate(times: &[f64], values: &[f64]) -> Result<Self, PacingError> {
        if times.is_empty() {
            return Err(PacingError::Invalid(
                "fixed-form pacing needs at least one sample".to_string(),
            ));
        }
        if times.len() != values.len() {
            return Err(PacingError::Invalid(format!(
                "fixed-form pacing has {} times but {} values",
                times.len(),
                values.len()
            )));
        }
        for (i, window) in times.windows(2).enumerate() {
            if !(window[1] > window[0]) {
                return Err(PacingError::Invalid(format!(
                    "fixed-form pacing times must be strictly increasing (samples {} and {})",
                    i,
                    i + 1
                )));
            }
        }
        if times.iter().any(|t| !t.is_finite()) {
            return Err(PacingError::Invalid(
                "fixed-form pacing times must be finite".to_string(),
            ));
        }
        Ok(Self {
            times: times.to_vec(),
            values: values.to_vec(),
        })
    }

    /// The interpolated level at time `t`, clamped to the series' endpoints.
    pub fn level_at(&self, t: f64) -> f64 {
        let n = self.times.len();
        if t <= self.times[0] {
            return self.values[0];
        }
        if t >= self.times[n - 1] {
            return self.values[n - 1];
        }
        // First sample strictly after t; t is inside the range, so
        // 1 <= hi <= n - 1.
        let hi = self.times.partition_point(|&ti| ti <= t);
        let lo = hi - 1;
        let span = self.times[hi] - self.times[lo];
        let w = (t - self.times[lo]) / span;
        self.values[lo] + w * (self.values[hi] - self.values[lo])
    }
}
