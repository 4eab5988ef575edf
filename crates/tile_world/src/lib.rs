//! Tile World - engine-agnostic core for an infinite-tilemap editor.
//!
//! This crate holds the pure logic underneath the Bevy integration crate:
//! coordinate types, the fixed-size viewport tile layer, the camera motion
//! filter with quadratic prediction, and the attention task pools.

pub mod coords;
pub mod layer;
pub mod motion;
pub mod prediction;
pub mod tasks;

pub use coords::{
  CellCoord, PixelRect, TILE_SIZE, TileCoord, TileIndex, pack_tile_key, unpack_tile_key,
};
pub use layer::TileLayer;
pub use motion::{MotionConfig, MotionFilter, MotionSample};
pub use prediction::{PredictionConfig, center_target, movement_target, plan_shift};
pub use tasks::{
  GameTask, PoolKind, PoolSnapshot, TaskId, TaskIdGenerator, TaskPools, TaskSpec, TaskSpecError,
};

// Re-exported so downstream crates use the exact same math types.
pub use glam::{IVec2, Vec2};
