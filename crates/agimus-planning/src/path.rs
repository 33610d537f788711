//! Time-parameterised configuration paths.
//!
//! A [`Path`] interpolates linearly between waypoints.  Evaluation outside
//! the time range is clamped to the end configurations, with zero velocity.

use agimus_types::AgimusError;
use serde::{Deserialize, Serialize};

/// One waypoint: a configuration reached at `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub time: f64,
    pub configuration: Vec<f64>,
}

/// Bound on the number of intervals [`Path::sample`] splits a path into.
pub const MAX_SAMPLES: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    waypoints: Vec<Waypoint>,
}

impl Path {
    /// Build a path.
    ///
    /// # Errors
    ///
    /// [`AgimusError::InvalidArgument`] when there is no waypoint, when times
    /// are not finite and strictly increasing, or when a value is not
    /// finite; [`AgimusError::DimensionMismatch`] when configurations differ
    /// in size.
    pub fn new(waypoints: Vec<Waypoint>) -> Result<Self, AgimusError> {
        let first = waypoints
            .first()
            .ok_or_else(|| AgimusError::InvalidArgument("a path needs at least one waypoint".into()))?;
        let size = first.configuration.len();

        for (i, w) in waypoints.iter().enumerate() {
            if !w.time.is_finite() || w.configuration.iter().any(|v| !v.is_finite()) {
                return Err(AgimusError::InvalidArgument(format!(
                    "waypoint {i} has non-finite values"
                )));
            }
            if w.configuration.len() != size {
                return Err(AgimusError::DimensionMismatch {
                    what: format!("waypoint {i}"),
                    expected: size,
                    got: w.configuration.len(),
                });
            }
            if i > 0 && w.time <= waypoints[i - 1].time {
                return Err(AgimusError::InvalidArgument(format!(
                    "waypoint times must be strictly increasing (waypoint {i})"
                )));
            }
        }
        Ok(Self { waypoints })
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn output_size(&self) -> usize {
        self.waypoints[0].configuration.len()
    }

    /// `(start, end)` times.
    pub fn time_range(&self) -> (f64, f64) {
        let start = self.waypoints[0].time;
        let end = self.waypoints[self.waypoints.len() - 1].time;
        (start, end)
    }

    pub fn length(&self) -> f64 {
        let (start, end) = self.time_range();
        end - start
    }

    /// Configuration at time `t`.
    pub fn eval(&self, t: f64) -> Vec<f64> {
        let (start, end) = self.time_range();
        if self.waypoints.len() == 1 || t <= start {
            return self.waypoints[0].configuration.clone();
        }
        if t >= end {
            return self.waypoints[self.waypoints.len() - 1].configuration.clone();
        }
        let (a, b) = self.segment(t);
        let alpha = (t - a.time) / (b.time - a.time);
        a.configuration
            .iter()
            .zip(&b.configuration)
            .map(|(qa, qb)| qa + alpha * (qb - qa))
            .collect()
    }

    /// Velocity at time `t`.  At a waypoint the outgoing segment is used,
    /// except at the end of the path.
    pub fn derivative(&self, t: f64) -> Vec<f64> {
        let (start, end) = self.time_range();
        if self.waypoints.len() == 1 || t < start || t > end {
            return vec![0.0; self.output_size()];
        }
        let (a, b) = self.segment(t);
        let dt = b.time - a.time;
        a.configuration
            .iter()
            .zip(&b.configuration)
            .map(|(qa, qb)| (qb - qa) / dt)
            .collect()
    }

    /// Discretize the path every `step` seconds; the end time is always
    /// included.
    ///
    /// # Errors
    ///
    /// [`AgimusError::InvalidArgument`] when `step` is not positive and
    /// finite, or when it would split the path into [`MAX_SAMPLES`]
    /// intervals or more.
    pub fn sample(&self, step: f64) -> Result<Vec<(f64, Vec<f64>)>, AgimusError> {
        if !(step.is_finite() && step > 0.0) {
            return Err(AgimusError::InvalidArgument(format!(
                "sampling step must be positive, got {step}"
            )));
        }
        let (start, end) = self.time_range();
        let intervals = ((end - start) / step).floor();
        if intervals >= MAX_SAMPLES as f64 {
            return Err(AgimusError::InvalidArgument(format!(
                "sampling step {step} over [{start}, {end}] needs more than {MAX_SAMPLES} samples"
            )));
        }
        let n = intervals as usize;
        let mut samples: Vec<(f64, Vec<f64>)> = (0..=n)
            .map(|i| start + i as f64 * step)
            .map(|t| (t, self.eval(t)))
            .collect();
        if let Some((last, _)) = samples.last()
            && end - last > step * 1e-9
        {
            samples.push((end, self.eval(end)));
        }
        Ok(samples)
    }

    /// Segment containing `t`; requires at least two waypoints and `t` in
    /// range.
    fn segment(&self, t: f64) -> (&Waypoint, &Waypoint) {
        let n = self.waypoints.len();
        let upper = self
            .waypoints
            .partition_point(|w| w.time <= t)
            .clamp(1, n - 1);
        (&self.waypoints[upper - 1], &self.waypoints[upper])
    }
}
