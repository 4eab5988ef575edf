//! E2E tests for the tilemap streaming engine.
//!
//! Runs the full plugin stack against an in-memory store with deterministic
//! manual time: every `app.update()` advances the clock by one 50 ms frame,
//! and the store worker is drained synchronously each frame.

use std::time::Duration;

use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;
use bevy_tile_world::{
  AsyncStoreBehavior, CameraView, StoreCommand, StoreConfig, StoreDispatcher, TileCoord, TileEdit,
  TileIndex, TileStreamer, TileWorldPlugin, Vec2,
};

const FRAME_MS: u64 = 50;

struct StreamingHarness {
  app: App,
}

impl StreamingHarness {
  /// 128x128 screen at min_zoom 0.5 gives a 16x16 tile buffer.
  fn new() -> Self {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(
      FRAME_MS,
    )));
    app.insert_resource(AsyncStoreBehavior::Block);
    app.insert_resource(CameraView::new(128.0, 128.0));
    app.add_plugins(TileWorldPlugin::new(StoreConfig::in_memory()));

    let mut harness = Self { app };
    // First frames: worker reports ready, engine initializes, initial
    // centered window applies.
    harness.run_frames(4);
    harness
  }

  fn run_frames(&mut self, frames: u64) {
    for _ in 0..frames {
      self.app.update();
    }
  }

  fn run_ms(&mut self, ms: u64) {
    self.run_frames(ms.div_ceil(FRAME_MS));
  }

  fn set_camera(&mut self, center: Vec2) {
    self
      .app
      .world_mut()
      .resource_mut::<CameraView>()
      .set_center(center);
  }

  /// Moves the camera at a constant velocity (px/ms) for a duration.
  fn drift(&mut self, velocity: Vec2, ms: u64) {
    let frames = ms / FRAME_MS;
    for _ in 0..frames {
      let center = self.app.world().resource::<CameraView>().center;
      self.set_camera(center + velocity * FRAME_MS as f32);
      self.app.update();
    }
  }

  fn streamer(&self) -> &TileStreamer {
    self.app.world().resource::<TileStreamer>()
  }

  fn camera(&self) -> CameraView {
    self.app.world().resource::<CameraView>().clone()
  }
}

#[test]
fn cold_start_centers_an_empty_buffer() {
  let harness = StreamingHarness::new();
  let streamer = harness.streamer();

  assert_eq!(streamer.dimensions(), (16, 16));
  assert_eq!(streamer.anchor(), TileCoord::new(-8, -8));
  assert!(streamer.active_layer().is_visible());
  assert!(!streamer.scratch_layer().is_visible());

  // Empty world: every visible cell is absent.
  assert_eq!(streamer.tile_at_world_pixel(Vec2::ZERO), None);
  assert_eq!(streamer.tile_at_world_pixel(Vec2::new(-200.0, 150.0)), None);

  // Camera at the origin sits in the middle of the SafeZone.
  assert!(streamer.is_camera_in_safe_zone(&harness.camera()));
}

#[test]
fn camera_inside_safe_zone_triggers_no_work() {
  let mut harness = StreamingHarness::new();
  let anchor_before = harness.streamer().anchor();

  // Small wiggle well inside the SafeZone (radius ~102 px).
  harness.drift(Vec2::new(0.4, 0.0), 200);
  harness.drift(Vec2::new(-0.4, 0.0), 200);
  harness.run_ms(1000);

  let streamer = harness.streamer();
  assert_eq!(streamer.anchor(), anchor_before);
  assert!(!streamer.is_generating());
}

#[test]
fn steady_east_drift_shifts_the_buffer_ahead() {
  let mut harness = StreamingHarness::new();

  harness.drift(Vec2::new(1.0, 0.0), 2000);

  // Mid-drift the buffer has been regenerated eastward; the movement
  // targets always lead the camera's world view by at least two tiles at
  // request time, so the anchor has left the initial position behind.
  let streamer = harness.streamer();
  assert!(streamer.anchor().x > -8);
  // The perpendicular axis stays centered on the camera's row.
  assert_eq!(streamer.anchor().y, -8);

  // Park the camera; the stop debounce recenters the buffer on it.
  harness.run_ms(1500);

  let streamer = harness.streamer();
  let view = harness.camera();
  assert_eq!(streamer.anchor(), TileCoord::new(54, -8));
  let bounds = streamer.active_layer().get_bounds();
  assert!(bounds.contains(view.center));
  assert!(streamer.is_camera_in_safe_zone(&view));
}

#[test]
fn stop_recenters_after_the_debounce() {
  let mut harness = StreamingHarness::new();

  // Gentle drift to (100, 200), then park.
  harness.drift(Vec2::new(0.25, 0.5), 400);
  let center = harness.camera().center;
  assert!((center.x - 100.0).abs() < 1.0);
  assert!((center.y - 200.0).abs() < 1.0);

  // Hold still past the stop detection plus the 600 ms debounce.
  harness.run_ms(2000);

  let streamer = harness.streamer();
  assert_eq!(streamer.anchor(), TileCoord::new(-5, -2));

  // The camera ends within one tile of the buffer's pixel center.
  let buffer_center = streamer.active_layer().get_bounds().center();
  assert!((buffer_center.x - 100.0).abs() <= 32.0);
  assert!((buffer_center.y - 200.0).abs() <= 32.0);
  assert!(streamer.is_camera_in_safe_zone(&harness.camera()));
}

#[test]
fn teleport_zeroes_velocity_and_recenters() {
  let mut harness = StreamingHarness::new();

  // Build up some eastward velocity first.
  harness.drift(Vec2::new(1.5, 0.0), 600);

  // One-frame jump far east.
  let center = harness.camera().center;
  harness.set_camera(center + Vec2::new(10_000.0, 0.0));
  harness.run_ms(2500);

  let streamer = harness.streamer();
  let expected = TileCoord::new(
    (harness.camera().center.x / 32.0).floor() as i32 - 8,
    (harness.camera().center.y / 32.0).floor() as i32 - 8,
  );
  assert_eq!(streamer.anchor(), expected);
  assert!(streamer.is_camera_in_safe_zone(&harness.camera()));
}

#[test]
fn edits_appear_in_the_visible_buffer_and_survive_regeneration() {
  let mut harness = StreamingHarness::new();

  // Paint a tile at the origin through the editor message.
  harness.app.world_mut().write_message(TileEdit {
    coord: TileCoord::new(0, 0),
    index: Some(TileIndex(5)),
  });
  harness.run_frames(2);

  let streamer = harness.streamer();
  assert_eq!(
    streamer.tile_at_world_pixel(Vec2::new(1.0, 1.0)),
    Some(TileIndex(5))
  );
  assert!(streamer.is_tile_connected(TileCoord::new(1, 0)));
  assert!(!streamer.is_tile_connected(TileCoord::new(3, 3)));

  // Drift far east so the buffer regenerates away, then teleport back.
  harness.drift(Vec2::new(2.0, 0.0), 3000);
  assert_eq!(
    harness.streamer().tile_at_world_pixel(Vec2::new(1.0, 1.0)),
    None
  );

  harness.set_camera(Vec2::ZERO);
  harness.run_ms(2500);

  // The edit went through the store, so the regenerated window has it.
  assert_eq!(
    harness.streamer().tile_at_world_pixel(Vec2::new(1.0, 1.0)),
    Some(TileIndex(5))
  );
}

#[test]
fn switching_levels_rebuilds_the_buffers() {
  let mut harness = StreamingHarness::new();

  // Paint on level 0, then switch to level 1.
  harness.app.world_mut().write_message(TileEdit {
    coord: TileCoord::new(0, 0),
    index: Some(TileIndex(4)),
  });
  harness.run_frames(2);

  harness
    .app
    .world()
    .resource::<StoreDispatcher>()
    .send(StoreCommand::SetCurrentLevel { level: 1 });
  harness.run_ms(500);

  let streamer = harness.streamer();
  assert_eq!(streamer.level(), 1);
  // Level 1 is empty; the level-0 edit is not visible here.
  assert_eq!(streamer.tile_at_world_pixel(Vec2::new(1.0, 1.0)), None);
  // The buffer regenerated around the camera on the new level.
  assert_eq!(streamer.anchor(), TileCoord::new(-8, -8));
  assert!(streamer.active_layer().is_visible());
}
