//! Persistent world store - a single-threaded worker behind a channel pair.
//!
//! The worker owns the only mutable copy of the persisted world: sparse
//! per-level tile maps, the current level, the attention limit, and the
//! task pool snapshots. All traffic is message-valued commands and results;
//! nothing mutable is shared across the boundary.
//!
//! Systems talk to the worker through [`StoreDispatcher`] and receive
//! results via the polling system, which routes them into Bevy messages.

pub mod format;
pub mod state;
mod worker;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_channel::{Receiver, Sender, TryRecvError};
use bevy::app::AppExit;
use bevy::ecs::message::{MessageReader, MessageWriter};
use bevy::prelude::*;
use tile_world::{GameTask, PoolKind, PoolSnapshot, TaskId, TileCoord, TileIndex};

use crate::TileWorldSet;
use crate::config::StoreConfig;

/// A request to the store worker.
///
/// Every command except `Shutdown` produces exactly one [`StoreResult`].
/// `level: None` means the store's current level.
#[derive(Clone, Debug)]
pub enum StoreCommand {
  /// Read a rectangular window of tiles, row-major.
  LoadWindow {
    level: Option<u16>,
    anchor: TileCoord,
    width: u32,
    height: u32,
  },
  /// Read one tile.
  GetTile { level: Option<u16>, coord: TileCoord },
  /// Write one tile; `None` erases.
  SetTile {
    level: Option<u16>,
    coord: TileCoord,
    index: Option<TileIndex>,
  },
  /// Batched tile write.
  SetTiles {
    level: Option<u16>,
    tiles: Vec<(TileCoord, Option<TileIndex>)>,
  },
  /// Count stored tiles in a level.
  GetTileCount { level: Option<u16> },
  /// Read the current level index.
  GetCurrentLevel,
  /// Switch the current level.
  SetCurrentLevel { level: u16 },
  /// Read all task pools.
  GetTasks,
  /// Append tasks to the persisted *Pending* pool.
  PushTasks { tasks: Vec<GameTask> },
  /// Move a task between persisted pools.
  MoveTask {
    id: TaskId,
    from: PoolKind,
    to: PoolKind,
  },
  /// Remove a task from a persisted pool.
  RemoveTask { id: TaskId, from: PoolKind },
  /// Record elapsed progress for active tasks.
  UpdateActiveProgress { updates: Vec<(TaskId, u64)> },
  /// Read the persisted attention limit.
  GetAttentionLimit,
  /// Write the attention limit.
  SetAttentionLimit { limit: u32 },
  /// Commit dirty categories if any (trailing autosave throttle).
  Autosave,
  /// Commit synchronously.
  Flush,
  /// Commit and stop the worker. No reply.
  Shutdown,
}

/// A reply from the store worker.
#[derive(Clone, Debug)]
pub enum StoreResult {
  /// Sent once after the store loaded its persisted state.
  Ready {
    level: u16,
    attention_limit: u32,
    pools: PoolSnapshot,
  },
  WindowLoaded {
    level: u16,
    anchor: TileCoord,
    width: u32,
    height: u32,
    tiles: Vec<Option<TileIndex>>,
  },
  TileLoaded {
    level: u16,
    coord: TileCoord,
    index: Option<TileIndex>,
  },
  TilesWritten {
    level: u16,
    applied: u32,
  },
  TileCount {
    level: u16,
    count: u64,
  },
  CurrentLevel {
    level: u16,
  },
  LevelChanged {
    level: u16,
  },
  TasksLoaded {
    pools: PoolSnapshot,
  },
  TasksPushed {
    ids: Vec<TaskId>,
  },
  TaskMoved {
    id: TaskId,
    applied: bool,
  },
  TaskRemoved {
    id: TaskId,
    applied: bool,
  },
  ProgressRecorded {
    applied: u32,
  },
  AttentionLimit {
    limit: u32,
  },
  AttentionLimitSet {
    limit: u32,
  },
  AutosaveComplete {
    wrote: bool,
  },
  FlushComplete,
  Error {
    message: String,
  },
}

// ===== Messages the polling system routes results into =====

/// The store worker finished loading its persisted state.
#[derive(Message, Clone, Debug)]
pub struct StoreReady {
  pub level: u16,
  pub attention_limit: u32,
  pub pools: PoolSnapshot,
}

/// A window read completed.
#[derive(Message, Clone, Debug)]
pub struct WindowLoaded {
  pub level: u16,
  pub anchor: TileCoord,
  pub width: u32,
  pub height: u32,
  pub tiles: Vec<Option<TileIndex>>,
}

/// A point read completed.
#[derive(Message, Clone, Debug)]
pub struct TileLoaded {
  pub level: u16,
  pub coord: TileCoord,
  pub index: Option<TileIndex>,
}

/// A tile-count query completed.
#[derive(Message, Clone, Debug)]
pub struct TileCountLoaded {
  pub level: u16,
  pub count: u64,
}

/// The current level changed (or was queried).
#[derive(Message, Clone, Debug)]
pub struct LevelChanged {
  pub level: u16,
}

/// A task-pool query completed.
#[derive(Message, Clone, Debug)]
pub struct TasksLoaded {
  pub pools: PoolSnapshot,
}

/// An attention-limit query completed.
#[derive(Message, Clone, Debug)]
pub struct AttentionLimitLoaded {
  pub limit: u32,
}

/// The worker reported a failure.
#[derive(Message, Clone, Debug)]
pub struct StoreFault {
  pub message: String,
}

/// The store's current level index, mirrored from the worker.
#[derive(Resource, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurrentLevel(pub u16);

/// How the polling system waits for worker results.
///
/// `Block` drains every outstanding reply before the frame continues,
/// giving synchronous semantics in test environments.
#[derive(Resource, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AsyncStoreBehavior {
  #[default]
  Poll,
  Block,
}

/// Handle to the store worker thread.
#[derive(Resource)]
pub struct StoreDispatcher {
  cmd_tx: Sender<StoreCommand>,
  result_rx: Receiver<StoreResult>,
  ready: AtomicBool,
  /// Commands awaiting a reply. Starts at 1 for the unsolicited `Ready`.
  pending: AtomicUsize,
  /// Results taken off the channel by a blocking wait, still to be routed.
  buffered: Mutex<VecDeque<StoreResult>>,
  _worker: Option<JoinHandle<()>>,
}

impl StoreDispatcher {
  /// Spawns the worker thread for the given save path (`None` = in-memory).
  pub fn new(path: Option<PathBuf>) -> Self {
    let (cmd_tx, cmd_rx) = async_channel::unbounded::<StoreCommand>();
    let (result_tx, result_rx) = async_channel::unbounded::<StoreResult>();

    let worker_handle = thread::Builder::new()
      .name("world-store".into())
      .spawn(move || worker::worker_loop(path, cmd_rx, result_tx))
      .ok();

    Self {
      cmd_tx,
      result_rx,
      ready: AtomicBool::new(false),
      pending: AtomicUsize::new(1),
      buffered: Mutex::new(VecDeque::new()),
      _worker: worker_handle,
    }
  }

  /// Sends a command to the worker.
  pub fn send(&self, cmd: StoreCommand) {
    if !matches!(cmd, StoreCommand::Shutdown) {
      self.pending.fetch_add(1, Ordering::AcqRel);
    }
    if self.cmd_tx.send_blocking(cmd).is_err() {
      self.pending.fetch_sub(1, Ordering::AcqRel);
    }
  }

  /// Takes the next available result, buffered ones first.
  pub fn try_recv(&self) -> Option<StoreResult> {
    if let Ok(mut buffered) = self.buffered.lock()
      && let Some(result) = buffered.pop_front()
    {
      return Some(result);
    }
    match self.result_rx.try_recv() {
      Ok(result) => {
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(result)
      }
      Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
    }
  }

  /// Number of commands still awaiting a reply.
  pub fn pending(&self) -> usize {
    self.pending.load(Ordering::Acquire)
  }

  /// Returns true if the worker has loaded its persisted state.
  pub fn is_ready(&self) -> bool {
    self.ready.load(Ordering::Acquire)
  }

  fn set_ready(&self, ready: bool) {
    self.ready.store(ready, Ordering::Release);
  }

  fn buffer(&self, result: StoreResult) {
    if let Ok(mut buffered) = self.buffered.lock() {
      buffered.push_back(result);
    }
  }

  /// Receives every outstanding reply, buffering them for routing.
  pub fn drain_pending_blocking(&self) {
    while self.pending() > 0 {
      match self.result_rx.recv_blocking() {
        Ok(result) => {
          self.pending.fetch_sub(1, Ordering::AcqRel);
          if matches!(result, StoreResult::Ready { .. }) {
            self.set_ready(true);
          }
          self.buffer(result);
        }
        Err(_) => break,
      }
    }
  }

  /// Blocks until the worker reports ready, or fails with the worker's
  /// startup error (a schema upgrade failure is fatal here).
  pub fn wait_ready_blocking(&self) -> Result<(), String> {
    if self.is_ready() {
      return Ok(());
    }
    loop {
      match self.result_rx.recv_blocking() {
        Ok(StoreResult::Error { message }) => {
          self.pending.fetch_sub(1, Ordering::AcqRel);
          return Err(message);
        }
        Ok(result) => {
          self.pending.fetch_sub(1, Ordering::AcqRel);
          let ready = matches!(result, StoreResult::Ready { .. });
          self.buffer(result);
          if ready {
            self.set_ready(true);
            return Ok(());
          }
        }
        Err(_) => return Err("world store worker is gone".into()),
      }
    }
  }

  /// Commits synchronously. Other results arriving meanwhile are buffered.
  pub fn flush_blocking(&self) -> Result<(), String> {
    self.send(StoreCommand::Flush);
    loop {
      match self.result_rx.recv_blocking() {
        Ok(result) => {
          self.pending.fetch_sub(1, Ordering::AcqRel);
          match result {
            StoreResult::FlushComplete => return Ok(()),
            StoreResult::Error { message } => return Err(message),
            other => self.buffer(other),
          }
        }
        Err(_) => return Err("world store worker is gone".into()),
      }
    }
  }
}

/// Timer driving the trailing autosave throttle.
#[derive(Resource)]
pub(crate) struct AutosaveTimer(pub Timer);

/// Internal plugin wiring the store worker into the app.
///
/// Added by the main `TileWorldPlugin`.
pub(crate) struct WorldStorePlugin;

impl Plugin for WorldStorePlugin {
  fn build(&self, app: &mut App) {
    let config = app
      .world()
      .get_resource::<StoreConfig>()
      .cloned()
      .unwrap_or_default();

    app.insert_resource(StoreDispatcher::new(config.path.clone()));
    app.init_resource::<AsyncStoreBehavior>();
    app.insert_resource(AutosaveTimer(Timer::new(
      Duration::from_secs(config.autosave_interval_secs.max(1)),
      TimerMode::Repeating,
    )));

    app.add_message::<StoreReady>();
    app.add_message::<WindowLoaded>();
    app.add_message::<TileLoaded>();
    app.add_message::<TileCountLoaded>();
    app.add_message::<LevelChanged>();
    app.add_message::<TasksLoaded>();
    app.add_message::<AttentionLimitLoaded>();
    app.add_message::<StoreFault>();

    app.add_systems(
      Update,
      (
        poll_store_results.in_set(TileWorldSet::StorePoll),
        autosave_tick.in_set(TileWorldSet::StoreMaintain),
      ),
    );
    app.add_systems(Last, shutdown_on_exit);
  }
}

/// System: Polls the store worker and routes results into messages.
#[allow(clippy::too_many_arguments)]
pub(crate) fn poll_store_results(
  mut commands: Commands,
  dispatcher: Option<Res<StoreDispatcher>>,
  behavior: Option<Res<AsyncStoreBehavior>>,
  mut ready_msgs: MessageWriter<StoreReady>,
  mut window_msgs: MessageWriter<WindowLoaded>,
  mut tile_msgs: MessageWriter<TileLoaded>,
  mut count_msgs: MessageWriter<TileCountLoaded>,
  mut level_msgs: MessageWriter<LevelChanged>,
  mut tasks_msgs: MessageWriter<TasksLoaded>,
  mut attention_msgs: MessageWriter<AttentionLimitLoaded>,
  mut fault_msgs: MessageWriter<StoreFault>,
) {
  let Some(dispatcher) = dispatcher else {
    return;
  };

  if matches!(behavior.as_deref(), Some(AsyncStoreBehavior::Block)) {
    dispatcher.drain_pending_blocking();
  }

  while let Some(result) = dispatcher.try_recv() {
    match result {
      StoreResult::Ready {
        level,
        attention_limit,
        pools,
      } => {
        info!(
          "World store ready: level {}, attention limit {}, {} persisted tasks",
          level,
          attention_limit,
          pools.len()
        );
        dispatcher.set_ready(true);
        commands.insert_resource(CurrentLevel(level));
        ready_msgs.write(StoreReady {
          level,
          attention_limit,
          pools,
        });
      }
      StoreResult::WindowLoaded {
        level,
        anchor,
        width,
        height,
        tiles,
      } => {
        window_msgs.write(WindowLoaded {
          level,
          anchor,
          width,
          height,
          tiles,
        });
      }
      StoreResult::TileLoaded {
        level,
        coord,
        index,
      } => {
        tile_msgs.write(TileLoaded {
          level,
          coord,
          index,
        });
      }
      StoreResult::TileCount { level, count } => {
        count_msgs.write(TileCountLoaded { level, count });
      }
      StoreResult::CurrentLevel { level } | StoreResult::LevelChanged { level } => {
        commands.insert_resource(CurrentLevel(level));
        level_msgs.write(LevelChanged { level });
      }
      StoreResult::TasksLoaded { pools } => {
        tasks_msgs.write(TasksLoaded { pools });
      }
      StoreResult::AttentionLimit { limit } => {
        attention_msgs.write(AttentionLimitLoaded { limit });
      }
      StoreResult::AutosaveComplete { wrote } => {
        if wrote {
          info!("Autosave committed dirty world state");
        }
      }
      StoreResult::TilesWritten { .. }
      | StoreResult::TasksPushed { .. }
      | StoreResult::TaskMoved { .. }
      | StoreResult::TaskRemoved { .. }
      | StoreResult::ProgressRecorded { .. }
      | StoreResult::AttentionLimitSet { .. }
      | StoreResult::FlushComplete => {}
      StoreResult::Error { message } => {
        warn!("World store error: {}", message);
        fault_msgs.write(StoreFault { message });
      }
    }
  }
}

/// System: Sends the trailing autosave command on its interval.
///
/// The worker only commits when something is dirty, so an idle interval
/// costs one message and no I/O.
pub(crate) fn autosave_tick(
  time: Res<Time>,
  timer: Option<ResMut<AutosaveTimer>>,
  dispatcher: Option<Res<StoreDispatcher>>,
) {
  let (Some(mut timer), Some(dispatcher)) = (timer, dispatcher) else {
    return;
  };
  if timer.0.tick(time.delta()).just_finished() && dispatcher.is_ready() {
    dispatcher.send(StoreCommand::Autosave);
  }
}

/// System: Flushes and stops the worker when the app exits.
pub(crate) fn shutdown_on_exit(
  mut exits: MessageReader<AppExit>,
  dispatcher: Option<Res<StoreDispatcher>>,
) {
  if exits.read().next().is_none() {
    return;
  }
  let Some(dispatcher) = dispatcher else {
    return;
  };
  if dispatcher.is_ready()
    && let Err(message) = dispatcher.flush_blocking()
  {
    warn!("Final world store flush failed: {}", message);
  }
  dispatcher.send(StoreCommand::Shutdown);
}
