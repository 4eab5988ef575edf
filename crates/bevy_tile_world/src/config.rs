//! Configuration resources for the three subsystems.
//!
//! Defaults follow the tuning the engine ships with; hosts override fields
//! before adding [`TileWorldPlugin`](crate::TileWorldPlugin).

use std::path::PathBuf;

use bevy::prelude::*;
use tile_world::{MotionConfig, PredictionConfig};

/// Tuning for the tilemap streaming engine.
#[derive(Resource, Clone, Debug)]
pub struct StreamingConfig {
  /// Most zoomed-out camera zoom the buffers must cover. Buffer dimensions
  /// are fixed at startup so the buffer spans at least two viewports at
  /// this zoom.
  pub min_zoom: f32,
  /// Size of the rest SafeZone relative to the active buffer extent.
  pub safe_zone_ratio: f32,
  /// Velocity filter tuning.
  pub motion: MotionConfig,
  /// Shift-planning tuning.
  pub prediction: PredictionConfig,
  /// Delay between detecting a stop and requesting a recenter (ms).
  pub center_debounce_ms: u64,
  /// Tick interval above `fast_speed` (ms).
  pub tick_fast_ms: u64,
  /// Tick interval between the stop threshold and `fast_speed` (ms).
  pub tick_medium_ms: u64,
  /// Tick interval at rest (ms).
  pub tick_slow_ms: u64,
  /// Speed above which the fast tick interval applies (px/ms).
  pub fast_speed: f32,
}

impl Default for StreamingConfig {
  fn default() -> Self {
    Self {
      min_zoom: 0.5,
      safe_zone_ratio: 0.4,
      motion: MotionConfig::default(),
      prediction: PredictionConfig::default(),
      center_debounce_ms: 600,
      tick_fast_ms: 50,
      tick_medium_ms: 100,
      tick_slow_ms: 200,
      fast_speed: 2.0,
    }
  }
}

/// Tuning for the attention scheduler.
#[derive(Resource, Clone, Debug)]
pub struct SchedulerConfig {
  /// Coalescing window for admission triggers (ms).
  pub admission_debounce_ms: u64,
  /// Progression tick granularity (ms).
  pub tick_ms: u64,
  /// Delay before an armed greedy backfill pass fires (ms).
  pub greedy_delay_ms: u64,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      admission_debounce_ms: 100,
      tick_ms: 1000,
      greedy_delay_ms: 30_000,
    }
  }
}

/// Configuration for the persistent world store.
///
/// Persistence is enabled by providing a save file path. Without one the
/// full worker protocol runs against an in-memory store.
#[derive(Resource, Clone, Debug)]
pub struct StoreConfig {
  /// Path to the save file. None = in-memory store.
  pub path: Option<PathBuf>,
  /// Trailing autosave throttle interval (seconds).
  pub autosave_interval_secs: u64,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self::in_memory()
  }
}

impl StoreConfig {
  /// Creates a store config persisting at the given path.
  pub fn at(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Some(path.into()),
      autosave_interval_secs: 30,
    }
  }

  /// Creates an in-memory store config.
  pub fn in_memory() -> Self {
    Self {
      path: None,
      autosave_interval_secs: 30,
    }
  }

  /// Sets the autosave interval.
  pub fn with_autosave_interval(mut self, secs: u64) -> Self {
    self.autosave_interval_secs = secs;
    self
  }

  /// Returns the OS-standard save file path for the given app name.
  ///
  /// - Linux: `~/.local/share/<app_name>/world.tiles`
  /// - Windows: `%APPDATA%/<app_name>/world.tiles`
  /// - macOS: `~/Library/Application Support/<app_name>/world.tiles`
  pub fn default_save_path(app_name: &str) -> PathBuf {
    dirs::data_dir()
      .unwrap_or_else(|| PathBuf::from("."))
      .join(app_name)
      .join("world.tiles")
  }

  /// Returns true if persistence is enabled (path is set).
  pub fn is_persistent(&self) -> bool {
    self.path.is_some()
  }
}
