//! In-memory world store owned by the worker thread.
//!
//! [`WorldStore`] holds the sparse per-level tile maps, the current level,
//! the attention limit, and the persisted task pools, together with
//! per-category dirty flags. A commit writes every category into one
//! atomic save-file replacement; a clean store commits nothing.

use std::collections::HashSet;
use std::path::PathBuf;

use tile_world::{GameTask, PoolKind, PoolSnapshot, TaskId, TileCoord, TileIndex, pack_tile_key};

use super::format::{self, SaveFileError, StoreData};

/// Which persisted categories have unsaved edits.
#[derive(Clone, Debug, Default)]
pub struct DirtyFlags {
  pub meta: bool,
  pub attention: bool,
  pub levels: HashSet<u16>,
  pub pools: [bool; 4],
}

impl DirtyFlags {
  /// True if anything needs committing.
  pub fn any(&self) -> bool {
    self.meta || self.attention || !self.levels.is_empty() || self.pools.iter().any(|&d| d)
  }

  /// Clears every flag.
  pub fn clear(&mut self) {
    self.meta = false;
    self.attention = false;
    self.levels.clear();
    self.pools = [false; 4];
  }

  fn mark_pool(&mut self, kind: PoolKind) {
    let at = PoolKind::ALL.iter().position(|&k| k == kind).unwrap_or(0);
    self.pools[at] = true;
  }
}

/// The worker's world state.
pub struct WorldStore {
  path: Option<PathBuf>,
  data: StoreData,
  dirty: DirtyFlags,
}

impl WorldStore {
  /// Opens the store, migrating older save files.
  ///
  /// With no path the store is in-memory. A missing file is a fresh store;
  /// an unreadable or future-versioned file is a fatal open error.
  pub fn open(path: Option<PathBuf>) -> Result<Self, SaveFileError> {
    let Some(file_path) = path.as_deref() else {
      return Ok(Self {
        path,
        data: StoreData::default(),
        dirty: DirtyFlags::default(),
      });
    };

    if !file_path.exists() {
      return Ok(Self {
        path,
        data: StoreData::default(),
        dirty: DirtyFlags::default(),
      });
    }

    let (data, version) = format::read_store(file_path)?;
    let mut store = Self {
      path,
      data,
      dirty: DirtyFlags::default(),
    };

    if version < format::VERSION {
      // Rewrite in the current schema on the next commit. Everything just
      // loaded counts as dirty so the migration cannot drop it.
      store.dirty.meta = true;
      store.dirty.attention = true;
      store.dirty.levels.extend(store.data.levels.keys().copied());
      store.dirty.pools = [true; 4];
    }

    Ok(store)
  }

  /// Returns true if the store persists to disk.
  pub fn is_persistent(&self) -> bool {
    self.path.is_some()
  }

  /// Resolves an optional level argument against the current level.
  pub fn resolve_level(&self, level: Option<u16>) -> u16 {
    level.unwrap_or(self.data.current_level)
  }

  /// Current level index.
  pub fn current_level(&self) -> u16 {
    self.data.current_level
  }

  /// Sets the current level index.
  pub fn set_current_level(&mut self, level: u16) {
    if self.data.current_level != level {
      self.data.current_level = level;
      self.dirty.meta = true;
    }
  }

  /// Persisted attention limit.
  pub fn attention_limit(&self) -> u32 {
    self.data.attention_limit
  }

  /// Sets the attention limit.
  pub fn set_attention_limit(&mut self, limit: u32) {
    if self.data.attention_limit != limit {
      self.data.attention_limit = limit;
      self.dirty.attention = true;
    }
  }

  /// Reads one tile.
  pub fn tile(&self, level: Option<u16>, coord: TileCoord) -> Option<TileIndex> {
    let level = self.resolve_level(level);
    let key = pack_tile_key(coord)?;
    self.data.levels.get(&level)?.get(&key).copied()
  }

  /// Writes one tile; `None` erases. Returns false if the coordinate does
  /// not fit the level's packed key range.
  pub fn set_tile(&mut self, level: Option<u16>, coord: TileCoord, index: Option<TileIndex>) -> bool {
    let level = self.resolve_level(level);
    let Some(key) = pack_tile_key(coord) else {
      return false;
    };

    match index {
      Some(index) => {
        self.data.levels.entry(level).or_default().insert(key, index);
      }
      None => {
        if let Some(tiles) = self.data.levels.get_mut(&level) {
          tiles.remove(&key);
          // Empty levels are deleted, not stored as empty collections.
          if tiles.is_empty() {
            self.data.levels.remove(&level);
          }
        }
      }
    }
    self.dirty.levels.insert(level);
    true
  }

  /// Batched tile write. Returns how many entries were applied.
  pub fn set_tiles(
    &mut self,
    level: Option<u16>,
    tiles: &[(TileCoord, Option<TileIndex>)],
  ) -> u32 {
    let mut applied = 0;
    for (coord, index) in tiles {
      if self.set_tile(level, *coord, *index) {
        applied += 1;
      }
    }
    applied
  }

  /// Number of stored tiles in a level.
  pub fn tile_count(&self, level: Option<u16>) -> u64 {
    let level = self.resolve_level(level);
    self.data.levels.get(&level).map(|t| t.len() as u64).unwrap_or(0)
  }

  /// Reads a rectangular window, row-major (`row[y][x]`). Cells outside the
  /// packed key range read as absent.
  pub fn window(
    &self,
    level: Option<u16>,
    anchor: TileCoord,
    width: u32,
    height: u32,
  ) -> Vec<Option<TileIndex>> {
    let level = self.resolve_level(level);
    let tiles = self.data.levels.get(&level);

    let mut out = Vec::with_capacity((width as usize) * (height as usize));
    for y in 0..height as i32 {
      for x in 0..width as i32 {
        let cell = pack_tile_key(anchor.offset(x, y))
          .and_then(|key| tiles.and_then(|t| t.get(&key).copied()));
        out.push(cell);
      }
    }
    out
  }

  /// Copies the persisted task pools.
  pub fn tasks(&self) -> PoolSnapshot {
    self.data.pools.clone()
  }

  /// Appends tasks to *Pending*, echoing their ids.
  pub fn push_tasks(&mut self, tasks: Vec<GameTask>) -> Vec<TaskId> {
    let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
    self.data.pools.pending.extend(tasks);
    self.dirty.mark_pool(PoolKind::Pending);
    ids
  }

  /// Moves a task between pools, appending to the destination. Returns
  /// false if the task is not in `from`.
  pub fn move_task(&mut self, id: TaskId, from: PoolKind, to: PoolKind) -> bool {
    let source = self.data.pools.pool_mut(from);
    let Some(at) = source.iter().position(|t| t.id == id) else {
      return false;
    };
    let task = source.remove(at);
    self.data.pools.pool_mut(to).push(task);
    self.dirty.mark_pool(from);
    self.dirty.mark_pool(to);
    true
  }

  /// Removes a task from a pool. Returns false if it is not there.
  pub fn remove_task(&mut self, id: TaskId, from: PoolKind) -> bool {
    let source = self.data.pools.pool_mut(from);
    let Some(at) = source.iter().position(|t| t.id == id) else {
      return false;
    };
    source.remove(at);
    self.dirty.mark_pool(from);
    true
  }

  /// Records elapsed progress for active tasks. Unknown ids are skipped.
  pub fn update_progress(&mut self, updates: &[(TaskId, u64)]) -> u32 {
    let mut applied = 0;
    for (id, elapsed_ms) in updates {
      if let Some(task) = self.data.pools.active.iter_mut().find(|t| t.id == *id) {
        task.elapsed_ms = *elapsed_ms;
        applied += 1;
      }
    }
    if applied > 0 {
      self.dirty.mark_pool(PoolKind::Active);
    }
    applied
  }

  /// True if any category has unsaved edits.
  pub fn is_dirty(&self) -> bool {
    self.dirty.any()
  }

  /// Commits all dirty categories atomically.
  ///
  /// Returns whether a disk write happened: a clean store, and an
  /// in-memory store, both commit without writing. On failure the dirty
  /// flags stay set so the next commit retries.
  pub fn commit(&mut self) -> Result<bool, SaveFileError> {
    if !self.dirty.any() {
      return Ok(false);
    }

    let Some(path) = self.path.as_deref() else {
      self.dirty.clear();
      return Ok(false);
    };

    format::write_store(path, &self.data)?;
    self.dirty.clear();
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tempfile::TempDir;

  fn task(id: u64, cost: u32) -> GameTask {
    GameTask {
      id: TaskId(id),
      kind: "mine".into(),
      cost,
      duration_ms: 5000,
      elapsed_ms: 0,
      payload: json!({ "depth": id }),
    }
  }

  #[test]
  fn tile_roundtrip_through_reopen() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("world.tiles");

    let mut store = WorldStore::open(Some(path.clone())).unwrap();
    assert!(store.set_tile(None, TileCoord::new(-3, 7), Some(TileIndex(12))));
    assert!(store.commit().unwrap());

    let reopened = WorldStore::open(Some(path)).unwrap();
    assert_eq!(
      reopened.tile(None, TileCoord::new(-3, 7)),
      Some(TileIndex(12))
    );
    assert_eq!(reopened.tile_count(None), 1);
  }

  #[test]
  fn window_matches_point_reads() {
    let mut store = WorldStore::open(None).unwrap();
    store.set_tile(None, TileCoord::new(0, 0), Some(TileIndex(1)));
    store.set_tile(None, TileCoord::new(2, 1), Some(TileIndex(2)));
    store.set_tile(None, TileCoord::new(-1, -1), Some(TileIndex(3)));

    let anchor = TileCoord::new(-2, -2);
    let window = store.window(None, anchor, 6, 6);
    for y in 0..6 {
      for x in 0..6 {
        let coord = anchor.offset(x, y);
        assert_eq!(
          window[(y * 6 + x) as usize],
          store.tile(None, coord),
          "mismatch at {:?}",
          coord
        );
      }
    }
  }

  #[test]
  fn erasing_the_last_tile_drops_the_level() {
    let mut store = WorldStore::open(None).unwrap();
    store.set_tile(Some(4), TileCoord::new(1, 1), Some(TileIndex(9)));
    assert_eq!(store.tile_count(Some(4)), 1);

    store.set_tile(Some(4), TileCoord::new(1, 1), None);
    assert_eq!(store.tile_count(Some(4)), 0);
    assert!(store.data.levels.is_empty());
  }

  #[test]
  fn out_of_range_coordinates_are_rejected() {
    let mut store = WorldStore::open(None).unwrap();
    assert!(!store.set_tile(None, TileCoord::new(40_000, 0), Some(TileIndex(1))));
    assert_eq!(store.tile(None, TileCoord::new(40_000, 0)), None);
  }

  #[test]
  fn commit_is_idempotent_after_quiescence() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("world.tiles");

    let mut store = WorldStore::open(Some(path)).unwrap();
    store.set_tile(None, TileCoord::new(0, 0), Some(TileIndex(1)));

    assert!(store.commit().unwrap());
    // No edits since: nothing to write.
    assert!(!store.commit().unwrap());
  }

  #[test]
  fn task_pools_roundtrip_in_their_pool() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("world.tiles");

    let mut store = WorldStore::open(Some(path.clone())).unwrap();
    store.push_tasks(vec![task(1, 2), task(2, 1)]);
    assert!(store.move_task(TaskId(1), PoolKind::Pending, PoolKind::Active));
    store.update_progress(&[(TaskId(1), 1500)]);
    assert!(store.commit().unwrap());

    let reopened = WorldStore::open(Some(path)).unwrap();
    let pools = reopened.tasks();
    assert_eq!(pools.active.len(), 1);
    assert_eq!(pools.active[0].elapsed_ms, 1500);
    assert_eq!(pools.pending.len(), 1);
    assert_eq!(pools.pending[0].payload, json!({ "depth": 2 }));
  }

  #[test]
  fn move_task_is_a_noop_for_wrong_pool() {
    let mut store = WorldStore::open(None).unwrap();
    store.push_tasks(vec![task(1, 1)]);
    assert!(!store.move_task(TaskId(1), PoolKind::Active, PoolKind::Paused));
    assert!(!store.remove_task(TaskId(1), PoolKind::Resumed));
    assert_eq!(store.tasks().pending.len(), 1);
  }

  #[test]
  fn attention_and_meta_persist() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("world.tiles");

    let mut store = WorldStore::open(Some(path.clone())).unwrap();
    store.set_attention_limit(32);
    store.set_current_level(7);
    assert!(store.commit().unwrap());

    let reopened = WorldStore::open(Some(path)).unwrap();
    assert_eq!(reopened.attention_limit(), 32);
    assert_eq!(reopened.current_level(), 7);
  }
}
