//! Coordinate types and spatial constants.
//!
//! Defines the coordinate system for the world:
//! - [`TileCoord`]: World tile cell (i32, unbounded)
//! - [`CellCoord`]: Cell within a viewport buffer (u32)
//! - [`TileIndex`]: Renderable tile variant
//! - [`PixelRect`]: Axis-aligned pixel rectangle
//!
//! Pixel positions are always derived from tile coordinates; no pixel value
//! is ever source-of-truth.

use glam::Vec2;

/// Size of a tile in pixels.
pub const TILE_SIZE: u32 = 32;

/// Bias applied to each axis when packing a tile coordinate into a level key.
///
/// Shifts the signed i32 axis into u16 range, so one level spans
/// -32768..=32767 per axis on disk.
const KEY_BIAS: i32 = 32768;

/// Index of a renderable tile variant.
///
/// An absent cell is represented as `Option<TileIndex>::None` rather than a
/// sentinel value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIndex(pub u16);

/// World tile cell position.
///
/// The world is unbounded; coordinates are free integers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TileCoord {
  pub x: i32,
  pub y: i32,
}

impl TileCoord {
  /// Creates a new tile coordinate.
  pub const fn new(x: i32, y: i32) -> Self {
    Self { x, y }
  }

  /// Returns the coordinate translated by the given tile offset.
  pub const fn offset(self, dx: i32, dy: i32) -> Self {
    Self {
      x: self.x + dx,
      y: self.y + dy,
    }
  }

  /// Pixel position of this tile's top-left corner.
  pub fn to_px(self) -> Vec2 {
    Vec2::new(
      self.x as f32 * TILE_SIZE as f32,
      self.y as f32 * TILE_SIZE as f32,
    )
  }

  /// Tile containing the given pixel position.
  ///
  /// Uses floor division for correct negative coordinate handling: pixel
  /// -1.0 maps to tile -1, not tile 0.
  pub fn from_px(px: Vec2) -> Self {
    Self {
      x: (px.x / TILE_SIZE as f32).floor() as i32,
      y: (px.y / TILE_SIZE as f32).floor() as i32,
    }
  }
}

/// Cell position within a viewport buffer (0..width, 0..height).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellCoord {
  pub x: u32,
  pub y: u32,
}

impl CellCoord {
  /// Creates a new cell coordinate.
  pub const fn new(x: u32, y: u32) -> Self {
    Self { x, y }
  }
}

/// Axis-aligned pixel rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PixelRect {
  pub min: Vec2,
  pub max: Vec2,
}

impl PixelRect {
  /// Creates a rectangle from its corners.
  pub fn new(min: Vec2, max: Vec2) -> Self {
    Self { min, max }
  }

  /// Creates a rectangle from center and full size.
  pub fn from_center_size(center: Vec2, size: Vec2) -> Self {
    let half = size * 0.5;
    Self {
      min: center - half,
      max: center + half,
    }
  }

  /// Rectangle center.
  pub fn center(&self) -> Vec2 {
    (self.min + self.max) * 0.5
  }

  /// Rectangle size.
  pub fn size(&self) -> Vec2 {
    self.max - self.min
  }

  /// Returns true if the point lies within the rectangle.
  ///
  /// The max edge is exclusive, matching cell indexing.
  pub fn contains(&self, p: Vec2) -> bool {
    p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
  }
}

/// Packs a tile coordinate into a 32-bit level key.
///
/// Returns `None` if either axis falls outside the 16-bit range a level
/// supports on disk.
pub fn pack_tile_key(coord: TileCoord) -> Option<u32> {
  let bx = coord.x.checked_add(KEY_BIAS)?;
  let by = coord.y.checked_add(KEY_BIAS)?;
  if !(0..=u16::MAX as i32).contains(&bx) || !(0..=u16::MAX as i32).contains(&by) {
    return None;
  }
  Some(((bx as u32) << 16) | (by as u32))
}

/// Unpacks a 32-bit level key back into a tile coordinate.
pub fn unpack_tile_key(key: u32) -> TileCoord {
  let bx = (key >> 16) as i32;
  let by = (key & 0xFFFF) as i32;
  TileCoord::new(bx - KEY_BIAS, by - KEY_BIAS)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_px_floors_negative_coordinates() {
    assert_eq!(TileCoord::from_px(Vec2::new(0.0, 0.0)), TileCoord::new(0, 0));
    assert_eq!(
      TileCoord::from_px(Vec2::new(-1.0, -1.0)),
      TileCoord::new(-1, -1)
    );
    assert_eq!(
      TileCoord::from_px(Vec2::new(31.9, 32.0)),
      TileCoord::new(0, 1)
    );
    assert_eq!(
      TileCoord::from_px(Vec2::new(-32.0, -33.0)),
      TileCoord::new(-1, -2)
    );
  }

  #[test]
  fn tile_key_roundtrip() {
    for coord in [
      TileCoord::new(0, 0),
      TileCoord::new(-1, 1),
      TileCoord::new(-32768, 32767),
      TileCoord::new(1000, -1000),
    ] {
      let key = pack_tile_key(coord).expect("coord in range");
      assert_eq!(unpack_tile_key(key), coord);
    }
  }

  #[test]
  fn tile_key_rejects_out_of_range() {
    assert!(pack_tile_key(TileCoord::new(32768, 0)).is_none());
    assert!(pack_tile_key(TileCoord::new(0, -32769)).is_none());
    assert!(pack_tile_key(TileCoord::new(i32::MAX, 0)).is_none());
  }

  #[test]
  fn pixel_rect_contains_is_max_exclusive() {
    let rect = PixelRect::from_center_size(Vec2::ZERO, Vec2::splat(64.0));
    assert!(rect.contains(Vec2::new(-32.0, -32.0)));
    assert!(rect.contains(Vec2::new(31.9, 31.9)));
    assert!(!rect.contains(Vec2::new(32.0, 0.0)));
  }
}
