//! Streaming engine systems.
//!
//! The engine drives itself: an adaptive tick samples the camera, predicts
//! motion, and requests window loads from the store worker; a second system
//! applies completed windows through the swap protocol.

use std::time::Duration;

use bevy::ecs::message::MessageReader;
use bevy::prelude::*;
use tile_world::{IVec2, MotionSample, plan_shift};

use super::{ApplyOutcome, CameraView, TileEdit, TileStreamer};
use crate::config::StreamingConfig;
use crate::store::{
  CurrentLevel, LevelChanged, StoreCommand, StoreDispatcher, StoreFault, WindowLoaded,
};

/// Submits a request and dispatches the window load it starts, if any.
fn submit_and_load(
  streamer: &mut TileStreamer,
  dir: IVec2,
  view: &CameraView,
  config: &StreamingConfig,
  dispatcher: &StoreDispatcher,
) {
  if let Some((target, width, height)) = streamer.submit(dir, view, config) {
    dispatcher.send(StoreCommand::LoadWindow {
      level: None,
      anchor: target,
      width,
      height,
    });
  }
}

/// System: Creates the engine once the camera and the store are both ready,
/// and kicks off the initial centered generation.
pub(crate) fn init_streaming(
  mut commands: Commands,
  config: Res<StreamingConfig>,
  view: Option<Res<CameraView>>,
  dispatcher: Option<Res<StoreDispatcher>>,
  level: Option<Res<CurrentLevel>>,
  streamer: Option<Res<TileStreamer>>,
) {
  if streamer.is_some() {
    return;
  }
  let (Some(view), Some(dispatcher)) = (view, dispatcher) else {
    return;
  };
  if !dispatcher.is_ready() {
    return;
  }

  let mut streamer = TileStreamer::new(&view, &config);
  if let Some(level) = level {
    streamer.set_level(level.0);
  }

  let (width, height) = streamer.dimensions();
  info!(
    "Tile streaming initialized: {}x{} buffer, level {}",
    width,
    height,
    streamer.level()
  );

  submit_and_load(&mut streamer, IVec2::ZERO, &view, &config, &dispatcher);
  commands.insert_resource(streamer);
}

/// System: The engine's adaptive tick.
///
/// Samples camera motion, manages the center-on-stop debounce, and emits
/// movement requests when the predicted position nears a buffer edge. While
/// the camera rests inside the SafeZone no request of any kind is emitted.
pub(crate) fn drive_streaming(
  time: Res<Time>,
  config: Res<StreamingConfig>,
  view: Option<Res<CameraView>>,
  streamer: Option<ResMut<TileStreamer>>,
  dispatcher: Option<Res<StoreDispatcher>>,
) {
  let (Some(view), Some(mut streamer), Some(dispatcher)) = (view, streamer, dispatcher) else {
    return;
  };

  // The debounce runs at frame rate so a stop registers on time even while
  // the main tick idles at its slow interval.
  let debounce_fired = match streamer.debounce_mut() {
    Some(timer) => timer.tick(time.delta()).finished(),
    None => false,
  };
  if debounce_fired {
    *streamer.debounce_mut() = None;
    if streamer.filter().speed() <= config.motion.stop_threshold {
      submit_and_load(&mut streamer, IVec2::ZERO, &view, &config, &dispatcher);
    }
  }

  if !streamer.tick_timer_mut().tick(time.delta()).just_finished() {
    return;
  }

  let now_ms = time.elapsed_secs_f64() * 1000.0;
  let sample = streamer.filter_mut().sample(view.center, now_ms, &config.motion);
  streamer.adapt_tick(&config);

  match sample {
    MotionSample::Resync => {
      debug!("Invalid camera sample, resyncing");
    }
    MotionSample::Teleport => {
      debug!("Camera teleport detected, recentering");
      *streamer.debounce_mut() = None;
      submit_and_load(&mut streamer, IVec2::ZERO, &view, &config, &dispatcher);
    }
    MotionSample::Stopped => {
      if !streamer.is_camera_in_safe_zone(&view) && streamer.debounce_mut().is_none() {
        *streamer.debounce_mut() = Some(Timer::new(
          Duration::from_millis(config.center_debounce_ms),
          TimerMode::Once,
        ));
      }
    }
    MotionSample::Moving => {
      *streamer.debounce_mut() = None;
      if streamer.is_camera_in_safe_zone(&view) {
        return;
      }
      let predicted = streamer.filter().predict(view.center, &config.motion);
      let dir = plan_shift(
        predicted,
        streamer.filter().velocity(),
        streamer.active_layer().get_bounds(),
        &config.prediction,
      );
      if dir != IVec2::ZERO {
        submit_and_load(&mut streamer, dir, &view, &config, &dispatcher);
      }
    }
  }
}

/// System: Applies completed window loads and chains queued requests.
pub(crate) fn apply_window_results(
  mut windows: MessageReader<WindowLoaded>,
  mut faults: MessageReader<StoreFault>,
  config: Res<StreamingConfig>,
  view: Option<Res<CameraView>>,
  streamer: Option<ResMut<TileStreamer>>,
  dispatcher: Option<Res<StoreDispatcher>>,
) {
  let (Some(view), Some(mut streamer), Some(dispatcher)) = (view, streamer, dispatcher) else {
    return;
  };

  // A worker fault drops the in-flight generation; the old buffer stays
  // visible and the next tick re-requests through normal prediction.
  if faults.read().next().is_some() && streamer.is_generating() {
    warn!("Window generation failed, keeping current buffer");
    streamer.abort_generation();
  }

  for msg in windows.read() {
    let outcome = streamer.on_window_loaded(
      msg.level,
      msg.anchor,
      msg.width,
      msg.height,
      &msg.tiles,
      &view,
      &config,
    );
    match outcome {
      ApplyOutcome::Applied => {}
      ApplyOutcome::Superseded {
        target,
        width,
        height,
      } => {
        debug!(
          "Window for {:?} superseded by queued request, loading {:?}",
          msg.anchor, target
        );
        dispatcher.send(StoreCommand::LoadWindow {
          level: None,
          anchor: target,
          width,
          height,
        });
      }
      ApplyOutcome::Discarded => {
        debug!("Discarded stale window for anchor {:?}", msg.anchor);
      }
    }
  }
}

/// System: Rebuilds the buffers when the store's current level changes.
pub(crate) fn handle_level_changes(
  mut levels: MessageReader<LevelChanged>,
  config: Res<StreamingConfig>,
  view: Option<Res<CameraView>>,
  streamer: Option<ResMut<TileStreamer>>,
  dispatcher: Option<Res<StoreDispatcher>>,
) {
  let (Some(view), Some(mut streamer), Some(dispatcher)) = (view, streamer, dispatcher) else {
    return;
  };

  for msg in levels.read() {
    if msg.level == streamer.level() {
      continue;
    }
    info!("Switching tile buffers to level {}", msg.level);
    streamer.reset_for_level(msg.level);
    submit_and_load(&mut streamer, IVec2::ZERO, &view, &config, &dispatcher);
  }
}

/// System: Applies editor tile edits to the visible buffer and forwards
/// them to the store as one batch per frame.
pub(crate) fn handle_tile_edits(
  mut edits: MessageReader<TileEdit>,
  streamer: Option<ResMut<TileStreamer>>,
  dispatcher: Option<Res<StoreDispatcher>>,
) {
  let mut batch = Vec::new();
  for edit in edits.read() {
    batch.push((edit.coord, edit.index));
  }
  if batch.is_empty() {
    return;
  }

  if let Some(mut streamer) = streamer {
    for (coord, index) in &batch {
      streamer.update_tile(*coord, *index);
    }
  }

  if let Some(dispatcher) = dispatcher
    && dispatcher.is_ready()
  {
    dispatcher.send(StoreCommand::SetTiles {
      level: None,
      tiles: batch,
    });
  }
}
