//! Camera motion filtering and extrapolation.
//!
//! [`MotionFilter`] turns raw camera position samples into an EMA-smoothed
//! velocity and acceleration estimate, detects teleports, and extrapolates
//! the camera position over a fixed horizon with a quadratic model.
//!
//! Units: positions in pixels, velocity in px/ms, acceleration in px/ms².

use glam::Vec2;

/// Tuning knobs for the motion filter.
#[derive(Clone, Copy, Debug)]
pub struct MotionConfig {
  /// EMA weight of the previous velocity estimate.
  pub smoothing: f32,
  /// Speeds at or below this are treated as stopped (px/ms).
  pub stop_threshold: f32,
  /// Hard clamp applied to each velocity component (px/ms).
  pub max_speed: f32,
  /// Instantaneous speeds above this are treated as a teleport (px/ms).
  pub teleport_threshold: f32,
  /// Extrapolation horizon (ms).
  pub prediction_time_ms: f32,
  /// Samples closer together than this are invalid (ms).
  pub min_sample_ms: f64,
  /// Samples further apart than this are invalid (ms).
  pub max_sample_ms: f64,
}

impl Default for MotionConfig {
  fn default() -> Self {
    Self {
      smoothing: 0.7,
      stop_threshold: 0.5,
      max_speed: 10.0,
      teleport_threshold: 20.0,
      prediction_time_ms: 300.0,
      min_sample_ms: 1.0,
      max_sample_ms: 1000.0,
    }
  }
}

/// Outcome of feeding one camera sample into the filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionSample {
  /// The sample or its Δt was unusable; state was resynced, not advanced.
  Resync,
  /// The camera jumped; the filter was zeroed.
  Teleport,
  /// Smoothed speed is at or below the stop threshold.
  Stopped,
  /// The camera is in motion.
  Moving,
}

/// EMA velocity/acceleration estimator over camera position samples.
#[derive(Clone, Debug, Default)]
pub struct MotionFilter {
  last_pos: Option<Vec2>,
  last_time_ms: f64,
  velocity: Vec2,
  accel: Vec2,
}

impl MotionFilter {
  /// Creates a filter with no history.
  pub fn new() -> Self {
    Self::default()
  }

  /// Current smoothed velocity (px/ms).
  pub fn velocity(&self) -> Vec2 {
    self.velocity
  }

  /// Current acceleration estimate (px/ms²).
  pub fn accel(&self) -> Vec2 {
    self.accel
  }

  /// Current smoothed speed (px/ms).
  pub fn speed(&self) -> f32 {
    self.velocity.length()
  }

  /// Zeroes the filter and re-anchors it at the given sample.
  pub fn reset(&mut self, pos: Vec2, now_ms: f64) {
    self.last_pos = Some(pos);
    self.last_time_ms = now_ms;
    self.velocity = Vec2::ZERO;
    self.accel = Vec2::ZERO;
  }

  /// Feeds one camera position sample into the filter.
  pub fn sample(&mut self, pos: Vec2, now_ms: f64, config: &MotionConfig) -> MotionSample {
    let Some(last_pos) = self.last_pos else {
      // First sample only anchors the filter.
      self.last_pos = Some(pos);
      self.last_time_ms = now_ms;
      return MotionSample::Resync;
    };

    let dt = now_ms - self.last_time_ms;
    if !pos.is_finite() || dt < config.min_sample_ms || dt > config.max_sample_ms {
      if pos.is_finite() {
        self.last_pos = Some(pos);
        self.last_time_ms = now_ms;
      }
      return MotionSample::Resync;
    }

    let instant = (pos - last_pos) / dt as f32;
    if instant.length() > config.teleport_threshold {
      self.reset(pos, now_ms);
      return MotionSample::Teleport;
    }

    let prev = self.velocity;
    let blended = prev * config.smoothing + instant * (1.0 - config.smoothing);
    self.velocity = blended.clamp(Vec2::splat(-config.max_speed), Vec2::splat(config.max_speed));
    self.accel = (self.velocity - prev) / dt as f32;
    self.last_pos = Some(pos);
    self.last_time_ms = now_ms;

    if self.speed() <= config.stop_threshold {
      MotionSample::Stopped
    } else {
      MotionSample::Moving
    }
  }

  /// Extrapolates the camera position over the prediction horizon.
  ///
  /// `p̂ = pos + v·T + ½·a·T²`
  pub fn predict(&self, pos: Vec2, config: &MotionConfig) -> Vec2 {
    let t = config.prediction_time_ms;
    pos + self.velocity * t + self.accel * (0.5 * t * t)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> MotionConfig {
    MotionConfig::default()
  }

  #[test]
  fn first_sample_only_anchors() {
    let mut filter = MotionFilter::new();
    assert_eq!(
      filter.sample(Vec2::new(10.0, 10.0), 0.0, &config()),
      MotionSample::Resync
    );
    assert_eq!(filter.velocity(), Vec2::ZERO);
  }

  #[test]
  fn steady_motion_converges_to_instant_velocity() {
    let mut filter = MotionFilter::new();
    let cfg = config();

    // 1 px/ms eastward, sampled every 100 ms.
    let mut now = 0.0;
    filter.sample(Vec2::ZERO, now, &cfg);
    for step in 1..=40 {
      now = step as f64 * 100.0;
      filter.sample(Vec2::new(now as f32, 0.0), now, &cfg);
    }

    assert!((filter.velocity().x - 1.0).abs() < 0.01);
    assert!(filter.velocity().y.abs() < 1e-6);
  }

  #[test]
  fn invalid_dt_resyncs_without_advancing() {
    let mut filter = MotionFilter::new();
    let cfg = config();

    filter.sample(Vec2::ZERO, 0.0, &cfg);
    filter.sample(Vec2::new(100.0, 0.0), 100.0, &cfg);
    let v = filter.velocity();

    // Sub-millisecond and multi-second gaps both resync.
    assert_eq!(
      filter.sample(Vec2::new(101.0, 0.0), 100.5, &cfg),
      MotionSample::Resync
    );
    assert_eq!(filter.velocity(), v);
    assert_eq!(
      filter.sample(Vec2::new(200.0, 0.0), 5000.0, &cfg),
      MotionSample::Resync
    );
    assert_eq!(filter.velocity(), v);
  }

  #[test]
  fn non_finite_sample_resyncs() {
    let mut filter = MotionFilter::new();
    let cfg = config();
    filter.sample(Vec2::ZERO, 0.0, &cfg);
    assert_eq!(
      filter.sample(Vec2::new(f32::NAN, 0.0), 100.0, &cfg),
      MotionSample::Resync
    );
  }

  #[test]
  fn teleport_zeroes_the_filter() {
    let mut filter = MotionFilter::new();
    let cfg = config();

    filter.sample(Vec2::ZERO, 0.0, &cfg);
    filter.sample(Vec2::new(50.0, 0.0), 100.0, &cfg);
    assert!(filter.speed() > 0.0);

    // 10000 px in 100 ms = 100 px/ms, far past the teleport threshold.
    assert_eq!(
      filter.sample(Vec2::new(10050.0, 0.0), 200.0, &cfg),
      MotionSample::Teleport
    );
    assert_eq!(filter.velocity(), Vec2::ZERO);
    assert_eq!(filter.accel(), Vec2::ZERO);
  }

  #[test]
  fn velocity_components_are_clamped() {
    let mut filter = MotionFilter::new();
    let cfg = config();

    filter.sample(Vec2::ZERO, 0.0, &cfg);
    let mut now = 0.0;
    // 18 px/ms: below teleport, above max_speed.
    for step in 1..=20 {
      now = step as f64 * 100.0;
      filter.sample(Vec2::new(now as f32 * 18.0, 0.0), now, &cfg);
    }
    assert!(filter.velocity().x <= cfg.max_speed);
  }

  #[test]
  fn slow_drift_reads_as_stopped() {
    let mut filter = MotionFilter::new();
    let cfg = config();

    filter.sample(Vec2::ZERO, 0.0, &cfg);
    // 0.1 px/ms is well under the 0.5 px/ms stop threshold.
    assert_eq!(
      filter.sample(Vec2::new(10.0, 0.0), 100.0, &cfg),
      MotionSample::Stopped
    );
  }

  #[test]
  fn predict_applies_quadratic_model() {
    let mut filter = MotionFilter::new();
    let cfg = config();

    filter.sample(Vec2::ZERO, 0.0, &cfg);
    for step in 1..=40 {
      let now = step as f64 * 100.0;
      filter.sample(Vec2::new(now as f32, 0.0), now, &cfg);
    }

    // Steady state: a ≈ 0, so p̂ ≈ pos + v·T ≈ pos + 300.
    let predicted = filter.predict(Vec2::new(4000.0, 0.0), &cfg);
    assert!((predicted.x - 4300.0).abs() < 10.0);
    assert!(predicted.y.abs() < 1.0);
  }
}
