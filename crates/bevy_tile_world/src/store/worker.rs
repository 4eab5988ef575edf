//! Store worker thread.
//!
//! Runs the single-threaded command loop that owns [`WorldStore`]. Every
//! command except `Shutdown` is answered with exactly one result; faults
//! become `StoreResult::Error` replies rather than panics.

use std::path::PathBuf;

use async_channel::{Receiver, Sender};

use super::state::WorldStore;
use super::{StoreCommand, StoreResult};

/// Main worker loop running in a dedicated thread.
pub(crate) fn worker_loop(
  path: Option<PathBuf>,
  cmd_rx: Receiver<StoreCommand>,
  result_tx: Sender<StoreResult>,
) {
  let mut store = match WorldStore::open(path) {
    Ok(store) => store,
    Err(e) => {
      // Schema upgrade or read failure is fatal for startup; the waiting
      // side observes it through wait_ready.
      let _ = result_tx.send_blocking(StoreResult::Error {
        message: format!("failed to open world store: {}", e),
      });
      return;
    }
  };

  let _ = result_tx.send_blocking(StoreResult::Ready {
    level: store.current_level(),
    attention_limit: store.attention_limit(),
    pools: store.tasks(),
  });

  while let Ok(cmd) = cmd_rx.recv_blocking() {
    if matches!(cmd, StoreCommand::Shutdown) {
      if let Err(e) = store.commit() {
        let _ = result_tx.send_blocking(StoreResult::Error {
          message: format!("final commit failed: {}", e),
        });
      }
      break;
    }

    let result = handle_command(&mut store, cmd);
    if result_tx.send_blocking(result).is_err() {
      break;
    }
  }
}

/// Handles a single command and returns its reply.
fn handle_command(store: &mut WorldStore, cmd: StoreCommand) -> StoreResult {
  match cmd {
    StoreCommand::LoadWindow {
      level,
      anchor,
      width,
      height,
    } => StoreResult::WindowLoaded {
      level: store.resolve_level(level),
      anchor,
      width,
      height,
      tiles: store.window(level, anchor, width, height),
    },
    StoreCommand::GetTile { level, coord } => StoreResult::TileLoaded {
      level: store.resolve_level(level),
      coord,
      index: store.tile(level, coord),
    },
    StoreCommand::SetTile {
      level,
      coord,
      index,
    } => {
      let applied = store.set_tile(level, coord, index);
      StoreResult::TilesWritten {
        level: store.resolve_level(level),
        applied: applied as u32,
      }
    }
    StoreCommand::SetTiles { level, tiles } => StoreResult::TilesWritten {
      level: store.resolve_level(level),
      applied: store.set_tiles(level, &tiles),
    },
    StoreCommand::GetTileCount { level } => StoreResult::TileCount {
      level: store.resolve_level(level),
      count: store.tile_count(level),
    },
    StoreCommand::GetCurrentLevel => StoreResult::CurrentLevel {
      level: store.current_level(),
    },
    StoreCommand::SetCurrentLevel { level } => {
      store.set_current_level(level);
      StoreResult::LevelChanged { level }
    }
    StoreCommand::GetTasks => StoreResult::TasksLoaded {
      pools: store.tasks(),
    },
    StoreCommand::PushTasks { tasks } => StoreResult::TasksPushed {
      ids: store.push_tasks(tasks),
    },
    StoreCommand::MoveTask { id, from, to } => StoreResult::TaskMoved {
      id,
      applied: store.move_task(id, from, to),
    },
    StoreCommand::RemoveTask { id, from } => StoreResult::TaskRemoved {
      id,
      applied: store.remove_task(id, from),
    },
    StoreCommand::UpdateActiveProgress { updates } => StoreResult::ProgressRecorded {
      applied: store.update_progress(&updates),
    },
    StoreCommand::GetAttentionLimit => StoreResult::AttentionLimit {
      limit: store.attention_limit(),
    },
    StoreCommand::SetAttentionLimit { limit } => {
      store.set_attention_limit(limit);
      StoreResult::AttentionLimitSet { limit }
    }
    StoreCommand::Autosave => match store.commit() {
      Ok(wrote) => StoreResult::AutosaveComplete { wrote },
      // Dirty flags stay set; the next interval retries.
      Err(e) => StoreResult::Error {
        message: format!("autosave failed: {}", e),
      },
    },
    StoreCommand::Flush => match store.commit() {
      Ok(_) => StoreResult::FlushComplete,
      Err(e) => StoreResult::Error {
        message: format!("flush failed: {}", e),
      },
    },
    StoreCommand::Shutdown => StoreResult::FlushComplete,
  }
}
