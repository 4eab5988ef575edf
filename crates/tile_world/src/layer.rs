//! Fixed-size viewport tile layer.
//!
//! A [`TileLayer`] is a `W×H` grid of optional tile indices positioned in
//! pixel space. Two of them form the streaming engine's double buffer; the
//! renderer consumes whichever one is visible.

use glam::Vec2;

use crate::coords::{CellCoord, PixelRect, TILE_SIZE, TileIndex};

/// A fixed-size grid of optional tile indices with a pixel-space origin.
///
/// Data is stored in row-major order (`y * width + x`). Cells hold `None`
/// where no tile is present.
#[derive(Clone, Debug)]
pub struct TileLayer {
  cells: Box<[Option<TileIndex>]>,
  width: u32,
  height: u32,
  origin: Vec2,
  visible: bool,
}

impl TileLayer {
  /// Creates a hidden layer of the given dimensions with every cell absent.
  pub fn new(width: u32, height: u32) -> Self {
    let len = (width as usize) * (height as usize);
    Self {
      cells: vec![None; len].into_boxed_slice(),
      width,
      height,
      origin: Vec2::ZERO,
      visible: false,
    }
  }

  /// Layer width in cells.
  #[inline]
  pub fn width(&self) -> u32 {
    self.width
  }

  /// Layer height in cells.
  #[inline]
  pub fn height(&self) -> u32 {
    self.height
  }

  /// Shows or hides the layer.
  pub fn set_visible(&mut self, visible: bool) {
    self.visible = visible;
  }

  /// Returns true if the layer is visible.
  pub fn is_visible(&self) -> bool {
    self.visible
  }

  /// Moves the layer's top-left corner to the given pixel position.
  pub fn set_position(&mut self, origin: Vec2) {
    self.origin = origin;
  }

  /// Pixel position of the layer's top-left corner.
  pub fn position(&self) -> Vec2 {
    self.origin
  }

  /// Pixel extent of the layer at its current position.
  pub fn get_bounds(&self) -> PixelRect {
    let size = Vec2::new(
      (self.width * TILE_SIZE) as f32,
      (self.height * TILE_SIZE) as f32,
    );
    PixelRect::new(self.origin, self.origin + size)
  }

  /// Converts (x, y) to a linear index, or `None` if out of bounds.
  #[inline]
  fn index_of(&self, cell: CellCoord) -> Option<usize> {
    if cell.x < self.width && cell.y < self.height {
      Some((cell.y as usize) * (self.width as usize) + (cell.x as usize))
    } else {
      None
    }
  }

  /// Reads the tile at a cell. Returns `None` for absent cells and for
  /// out-of-bounds cells alike.
  pub fn get_tile_at(&self, cell: CellCoord) -> Option<TileIndex> {
    self.index_of(cell).and_then(|i| self.cells[i])
  }

  /// Writes the tile at a cell. Out-of-bounds writes are ignored.
  pub fn put_tile_at(&mut self, index: Option<TileIndex>, cell: CellCoord) {
    if let Some(i) = self.index_of(cell) {
      self.cells[i] = index;
    }
  }

  /// Replaces the whole grid with a row-major slice of `width * height`
  /// cells. Returns false (leaving the grid untouched) on a length mismatch.
  pub fn put_tiles_at(&mut self, tiles: &[Option<TileIndex>]) -> bool {
    if tiles.len() != self.cells.len() {
      return false;
    }
    self.cells.copy_from_slice(tiles);
    true
  }

  /// Resets every cell to absent.
  pub fn clear(&mut self) {
    self.cells.fill(None);
  }

  /// Maps a world pixel position to the cell under it.
  ///
  /// Returns `None` iff the pixel lies outside the layer's pixel extent.
  pub fn world_to_tile_xy(&self, px: Vec2) -> Option<CellCoord> {
    if !self.get_bounds().contains(px) {
      return None;
    }
    let local = px - self.origin;
    Some(CellCoord::new(
      (local.x / TILE_SIZE as f32).floor() as u32,
      (local.y / TILE_SIZE as f32).floor() as u32,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_layer_is_hidden_and_absent() {
    let layer = TileLayer::new(4, 3);
    assert!(!layer.is_visible());
    for y in 0..3 {
      for x in 0..4 {
        assert_eq!(layer.get_tile_at(CellCoord::new(x, y)), None);
      }
    }
  }

  #[test]
  fn put_and_get_roundtrip() {
    let mut layer = TileLayer::new(4, 3);
    layer.put_tile_at(Some(TileIndex(7)), CellCoord::new(2, 1));
    assert_eq!(layer.get_tile_at(CellCoord::new(2, 1)), Some(TileIndex(7)));

    layer.put_tile_at(None, CellCoord::new(2, 1));
    assert_eq!(layer.get_tile_at(CellCoord::new(2, 1)), None);
  }

  #[test]
  fn out_of_bounds_access_is_ignored() {
    let mut layer = TileLayer::new(4, 3);
    layer.put_tile_at(Some(TileIndex(1)), CellCoord::new(4, 0));
    layer.put_tile_at(Some(TileIndex(1)), CellCoord::new(0, 3));
    assert_eq!(layer.get_tile_at(CellCoord::new(4, 0)), None);
    assert_eq!(layer.get_tile_at(CellCoord::new(0, 3)), None);
  }

  #[test]
  fn put_tiles_at_rejects_wrong_length() {
    let mut layer = TileLayer::new(2, 2);
    assert!(!layer.put_tiles_at(&[None; 3]));
    assert!(layer.put_tiles_at(&[Some(TileIndex(1)), None, None, Some(TileIndex(2))]));
    assert_eq!(layer.get_tile_at(CellCoord::new(0, 0)), Some(TileIndex(1)));
    assert_eq!(layer.get_tile_at(CellCoord::new(1, 1)), Some(TileIndex(2)));
  }

  #[test]
  fn world_to_tile_xy_respects_position() {
    let mut layer = TileLayer::new(4, 4);
    layer.set_position(Vec2::new(-64.0, -64.0));

    assert_eq!(
      layer.world_to_tile_xy(Vec2::new(-64.0, -64.0)),
      Some(CellCoord::new(0, 0))
    );
    assert_eq!(
      layer.world_to_tile_xy(Vec2::new(-1.0, -1.0)),
      Some(CellCoord::new(1, 1))
    );
    assert_eq!(
      layer.world_to_tile_xy(Vec2::new(63.9, 63.9)),
      Some(CellCoord::new(3, 3))
    );
    // Exactly on the max edge is outside.
    assert_eq!(layer.world_to_tile_xy(Vec2::new(64.0, 0.0)), None);
    assert_eq!(layer.world_to_tile_xy(Vec2::new(-65.0, 0.0)), None);
  }
}
