//! Predictive buffer-shift planning.
//!
//! Decides, from a predicted camera position and the active layer's extent,
//! whether the viewport buffer should shift and in which direction, and
//! computes the target anchor for movement and center regenerations.

use glam::{IVec2, Vec2};

use crate::coords::{PixelRect, TILE_SIZE, TileCoord};

/// Tuning knobs for shift planning.
#[derive(Clone, Copy, Debug)]
pub struct PredictionConfig {
  /// Edge-proximity trigger for the non-dominant axis, as a fraction of the
  /// buffer extent.
  pub base_threshold: f32,
  /// Edge-proximity trigger for the dominant axis.
  pub aggressive_threshold: f32,
  /// A component dominates when its magnitude exceeds this ratio times the
  /// other component's.
  pub dominance_ratio: f32,
  /// Direction components below this magnitude are ignored.
  pub deadband: f32,
}

impl Default for PredictionConfig {
  fn default() -> Self {
    Self {
      base_threshold: 0.33,
      aggressive_threshold: 0.50,
      dominance_ratio: 1.2,
      deadband: 0.1,
    }
  }
}

/// Computes the shift direction the buffer should move in, if any.
///
/// Each returned component is in {-1, 0, +1}. A zero vector means the
/// predicted position sits comfortably inside the buffer.
pub fn plan_shift(
  predicted_px: Vec2,
  velocity: Vec2,
  bounds: PixelRect,
  config: &PredictionConfig,
) -> IVec2 {
  // Prediction escaped the buffer entirely: point at the side it left by.
  if !bounds.contains(predicted_px) {
    let x = if predicted_px.x < bounds.min.x {
      -1
    } else if predicted_px.x >= bounds.max.x {
      1
    } else {
      0
    };
    let y = if predicted_px.y < bounds.min.y {
      -1
    } else if predicted_px.y >= bounds.max.y {
      1
    } else {
      0
    };
    return IVec2::new(x, y);
  }

  let dir = velocity.normalize_or_zero();
  let x_dominant = dir.x.abs() > config.dominance_ratio * dir.y.abs();
  let y_dominant = dir.y.abs() > config.dominance_ratio * dir.x.abs();

  let extent_tiles = bounds.size() / TILE_SIZE as f32;
  let cell = (predicted_px - bounds.min) / TILE_SIZE as f32;

  let axis_shift = |d: f32, cell: f32, extent: f32, dominant: bool| -> i32 {
    if d.abs() <= config.deadband {
      return 0;
    }
    let ratio = if dominant {
      config.aggressive_threshold
    } else {
      config.base_threshold
    };
    let margin = ratio * extent;
    if d > 0.0 && extent - cell <= margin {
      1
    } else if d < 0.0 && cell <= margin {
      -1
    } else {
      0
    }
  };

  IVec2::new(
    axis_shift(dir.x, cell.x, extent_tiles.x, x_dominant),
    axis_shift(dir.y, cell.y, extent_tiles.y, y_dominant),
  )
}

/// Target anchor for a movement regeneration.
///
/// Along each moving axis the incoming buffer edge lands at least two tiles
/// beyond the camera's world view; a non-moving axis re-centers on the
/// camera.
pub fn movement_target(
  dir: IVec2,
  camera_center: Vec2,
  world_view: PixelRect,
  width: u32,
  height: u32,
) -> TileCoord {
  let tile = TILE_SIZE as f32;

  let x = match dir.x {
    1 => (world_view.max.x / tile).ceil() as i32 + 2 - width as i32,
    -1 => (world_view.min.x / tile).floor() as i32 - 2,
    _ => (camera_center.x / tile).floor() as i32 - width as i32 / 2,
  };
  let y = match dir.y {
    1 => (world_view.max.y / tile).ceil() as i32 + 2 - height as i32,
    -1 => (world_view.min.y / tile).floor() as i32 - 2,
    _ => (camera_center.y / tile).floor() as i32 - height as i32 / 2,
  };

  TileCoord::new(x, y)
}

/// Target anchor that centers the buffer on the camera.
pub fn center_target(camera_center: Vec2, width: u32, height: u32) -> TileCoord {
  let tile = TILE_SIZE as f32;
  TileCoord::new(
    (camera_center.x / tile).floor() as i32 - width as i32 / 2,
    (camera_center.y / tile).floor() as i32 - height as i32 / 2,
  )
}
