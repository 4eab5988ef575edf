//! Bevy integration for the infinite-tilemap editor core.
//!
//! Three cooperating subsystems, each driven by its own timers:
//!
//! - **Streaming** - a predictive double-buffered tile viewport that follows
//!   the camera ([`TileStreamer`]).
//! - **Scheduler** - a bounded attention budget over four task lifecycle
//!   pools ([`AttentionScheduler`]).
//! - **Store** - a background worker owning the persisted sparse world
//!   ([`StoreDispatcher`]).
//!
//! Add [`TileWorldPlugin`], keep a [`CameraView`] resource current, and the
//! engine drives itself.

use bevy::prelude::*;

pub mod config;
pub mod scheduler;
pub mod store;
pub mod streaming;

pub use config::{SchedulerConfig, StoreConfig, StreamingConfig};
pub use scheduler::{AttentionScheduler, SchedulerError, TaskCompleted};
pub use store::{
  AsyncStoreBehavior, AttentionLimitLoaded, CurrentLevel, LevelChanged, StoreCommand,
  StoreDispatcher, StoreFault, StoreReady, TasksLoaded, TileCountLoaded, TileLoaded, WindowLoaded,
};
pub use streaming::{CameraView, TileEdit, TileStreamer};
// Core types hosts need alongside the plugins.
pub use tile_world::{
  GameTask, IVec2, PixelRect, PoolKind, PoolSnapshot, TILE_SIZE, TaskId, TaskSpec, TileCoord,
  TileIndex, Vec2,
};

/// Ordering of the subsystems within `Update`.
///
/// Worker results are routed first, then streaming, then the scheduler;
/// maintenance (autosave) runs last so it sees the frame's writes.
#[derive(SystemSet, Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum TileWorldSet {
  StorePoll,
  Streaming,
  Scheduler,
  StoreMaintain,
}

/// The top-level plugin composing store, streaming, and scheduler.
#[derive(Default)]
pub struct TileWorldPlugin {
  /// Streaming engine tuning.
  pub streaming: StreamingConfig,
  /// Scheduler tuning.
  pub scheduler: SchedulerConfig,
  /// Store location and autosave tuning.
  pub store: StoreConfig,
}

impl TileWorldPlugin {
  /// Creates the plugin with a store configuration.
  pub fn new(store: StoreConfig) -> Self {
    Self {
      store,
      ..Self::default()
    }
  }

  /// Sets the streaming configuration.
  pub fn streaming(mut self, config: StreamingConfig) -> Self {
    self.streaming = config;
    self
  }

  /// Sets the scheduler configuration.
  pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
    self.scheduler = config;
    self
  }
}

impl Plugin for TileWorldPlugin {
  fn build(&self, app: &mut App) {
    app.insert_resource(self.streaming.clone());
    app.insert_resource(self.scheduler.clone());
    app.insert_resource(self.store.clone());

    app.configure_sets(
      Update,
      (
        TileWorldSet::StorePoll,
        TileWorldSet::Streaming,
        TileWorldSet::Scheduler,
        TileWorldSet::StoreMaintain,
      )
        .chain(),
    );

    app.add_plugins((
      store::WorldStorePlugin,
      streaming::TileStreamingPlugin,
      scheduler::AttentionSchedulerPlugin,
    ));
  }
}
