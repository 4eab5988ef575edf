//! Attention task pools.
//!
//! Long-running game tasks live in exactly one of four lifecycle pools:
//! *Active* (progressing, counted against the budget), *Resumed* (FIFO,
//! admitted before new work), *Pending* (FIFO, new work), and *Paused*
//! (frozen). [`TaskPools`] owns the containers and the admission math; the
//! scheduler crate drives it from timers.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde_json::Value;

/// Opaque unique task identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "task#{}", self.0)
  }
}

/// Monotonic task id allocator.
#[derive(Clone, Debug)]
pub struct TaskIdGenerator {
  next: u64,
}

impl TaskIdGenerator {
  /// Creates a generator starting at 1.
  pub fn new() -> Self {
    Self { next: 1 }
  }

  /// Ensures future ids are strictly greater than `id`.
  pub fn seed_above(&mut self, id: TaskId) {
    self.next = self.next.max(id.0 + 1);
  }

  /// Allocates the next id.
  pub fn next_id(&mut self) -> TaskId {
    let id = TaskId(self.next);
    self.next += 1;
    id
  }
}

impl Default for TaskIdGenerator {
  fn default() -> Self {
    Self::new()
  }
}

/// The four lifecycle pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolKind {
  Active,
  Resumed,
  Pending,
  Paused,
}

impl PoolKind {
  /// All pools, in persistence order.
  pub const ALL: [PoolKind; 4] = [
    PoolKind::Active,
    PoolKind::Resumed,
    PoolKind::Pending,
    PoolKind::Paused,
  ];

  /// Stable name used in logs and on disk.
  pub fn as_str(self) -> &'static str {
    match self {
      PoolKind::Active => "active",
      PoolKind::Resumed => "resumed",
      PoolKind::Pending => "pending",
      PoolKind::Paused => "paused",
    }
  }
}

/// Validation failure for a task spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskSpecError {
  /// `cost` must be at least 1.
  InvalidCost,
  /// `duration_ms` must be positive.
  InvalidDuration,
}

impl fmt::Display for TaskSpecError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::InvalidCost => write!(f, "task cost must be >= 1"),
      Self::InvalidDuration => write!(f, "task duration must be > 0 ms"),
    }
  }
}

impl std::error::Error for TaskSpecError {}

/// Input for creating a task.
#[derive(Clone, Debug)]
pub struct TaskSpec {
  /// Task kind tag; interpretation happens outside the scheduler.
  pub kind: String,
  /// Attention cost, independent of duration.
  pub cost: u32,
  /// Total run time while active.
  pub duration_ms: u64,
  /// Opaque payload handed back on completion.
  pub payload: Value,
}

/// A long-running game task.
#[derive(Clone, Debug, PartialEq)]
pub struct GameTask {
  pub id: TaskId,
  pub kind: String,
  pub cost: u32,
  pub duration_ms: u64,
  pub elapsed_ms: u64,
  pub payload: Value,
}

impl GameTask {
  /// Builds a task from a validated spec.
  pub fn from_spec(id: TaskId, spec: TaskSpec) -> Result<Self, TaskSpecError> {
    if spec.cost < 1 {
      return Err(TaskSpecError::InvalidCost);
    }
    if spec.duration_ms == 0 {
      return Err(TaskSpecError::InvalidDuration);
    }
    Ok(Self {
      id,
      kind: spec.kind,
      cost: spec.cost,
      duration_ms: spec.duration_ms,
      elapsed_ms: 0,
      payload: spec.payload,
    })
  }

  /// True once the task has run its full duration.
  pub fn is_complete(&self) -> bool {
    self.elapsed_ms >= self.duration_ms
  }
}

/// Flat copy of all four pools, used for persistence and hydration.
///
/// `resumed` and `pending` preserve FIFO order; `active` and `paused` carry
/// no meaningful order.
#[derive(Clone, Debug, Default)]
pub struct PoolSnapshot {
  pub active: Vec<GameTask>,
  pub resumed: Vec<GameTask>,
  pub pending: Vec<GameTask>,
  pub paused: Vec<GameTask>,
}

impl PoolSnapshot {
  /// Total number of tasks across all pools.
  pub fn len(&self) -> usize {
    self.active.len() + self.resumed.len() + self.pending.len() + self.paused.len()
  }

  /// True if every pool is empty.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Iterates every task in the snapshot.
  pub fn iter(&self) -> impl Iterator<Item = &GameTask> {
    self
      .active
      .iter()
      .chain(self.resumed.iter())
      .chain(self.pending.iter())
      .chain(self.paused.iter())
  }

  /// The tasks of one pool.
  pub fn pool(&self, kind: PoolKind) -> &[GameTask] {
    match kind {
      PoolKind::Active => &self.active,
      PoolKind::Resumed => &self.resumed,
      PoolKind::Pending => &self.pending,
      PoolKind::Paused => &self.paused,
    }
  }

  /// Mutable access to the tasks of one pool.
  pub fn pool_mut(&mut self, kind: PoolKind) -> &mut Vec<GameTask> {
    match kind {
      PoolKind::Active => &mut self.active,
      PoolKind::Resumed => &mut self.resumed,
      PoolKind::Pending => &mut self.pending,
      PoolKind::Paused => &mut self.paused,
    }
  }
}

/// The four pools plus the admission math over the attention budget.
///
/// Capacity is the attention coefficient `C`; a set of active tasks is
/// admissible while `Σ cost <= C`. Admission never preempts: only pause,
/// cancel or completion frees capacity.
#[derive(Clone, Debug, Default)]
pub struct TaskPools {
  active: HashMap<TaskId, GameTask>,
  resumed: VecDeque<GameTask>,
  pending: VecDeque<GameTask>,
  paused: HashMap<TaskId, GameTask>,
}

impl TaskPools {
  /// Creates empty pools.
  pub fn new() -> Self {
    Self::default()
  }

  /// Rebuilds the pools from a persisted snapshot.
  pub fn from_snapshot(snapshot: PoolSnapshot) -> Self {
    Self {
      active: snapshot.active.into_iter().map(|t| (t.id, t)).collect(),
      resumed: snapshot.resumed.into(),
      pending: snapshot.pending.into(),
      paused: snapshot.paused.into_iter().map(|t| (t.id, t)).collect(),
    }
  }

  /// Copies the pools into a flat snapshot.
  pub fn snapshot(&self) -> PoolSnapshot {
    PoolSnapshot {
      active: self.active.values().cloned().collect(),
      resumed: self.resumed.iter().cloned().collect(),
      pending: self.pending.iter().cloned().collect(),
      paused: self.paused.values().cloned().collect(),
    }
  }

  /// Sum of active costs.
  pub fn used_cost(&self) -> u64 {
    self.active.values().map(|t| t.cost as u64).sum()
  }

  /// Used fraction of the attention budget, 0 when the coefficient is 0.
  pub fn used_attention(&self, coefficient: u32) -> f64 {
    if coefficient == 0 {
      0.0
    } else {
      self.used_cost() as f64 / coefficient as f64
    }
  }

  /// Free fraction of the attention budget.
  pub fn free_attention(&self, coefficient: u32) -> f64 {
    1.0 - self.used_attention(coefficient)
  }

  /// True if a task of the given cost fits the remaining budget.
  pub fn can_fit(&self, cost: u32, coefficient: u32) -> bool {
    coefficient > 0 && self.used_cost() + cost as u64 <= coefficient as u64
  }

  /// Number of active tasks.
  pub fn active_count(&self) -> usize {
    self.active.len()
  }

  /// Iterates active tasks in no particular order.
  pub fn iter_active(&self) -> impl Iterator<Item = &GameTask> {
    self.active.values()
  }

  /// Looks a task up across all pools.
  pub fn get(&self, id: TaskId) -> Option<&GameTask> {
    self
      .active
      .get(&id)
      .or_else(|| self.paused.get(&id))
      .or_else(|| self.resumed.iter().find(|t| t.id == id))
      .or_else(|| self.pending.iter().find(|t| t.id == id))
  }

  /// Returns which pool holds the task, if any.
  pub fn pool_of(&self, id: TaskId) -> Option<PoolKind> {
    if self.active.contains_key(&id) {
      Some(PoolKind::Active)
    } else if self.paused.contains_key(&id) {
      Some(PoolKind::Paused)
    } else if self.resumed.iter().any(|t| t.id == id) {
      Some(PoolKind::Resumed)
    } else if self.pending.iter().any(|t| t.id == id) {
      Some(PoolKind::Pending)
    } else {
      None
    }
  }

  /// Appends a new task to *Pending*.
  pub fn push_pending(&mut self, task: GameTask) {
    self.pending.push_back(task);
  }

  /// *Active* → *Paused*. Returns false if the task is not active.
  pub fn pause(&mut self, id: TaskId) -> bool {
    let Some(task) = self.active.remove(&id) else {
      return false;
    };
    self.paused.insert(id, task);
    true
  }

  /// *Paused* → *Resumed* (appended). Returns false if the task is not
  /// paused.
  pub fn resume(&mut self, id: TaskId) -> bool {
    let Some(task) = self.paused.remove(&id) else {
      return false;
    };
    self.resumed.push_back(task);
    true
  }

  /// *Resumed* → *Paused*. Returns false if the task is not in *Resumed*.
  pub fn pause_resumed(&mut self, id: TaskId) -> bool {
    let Some(at) = self.resumed.iter().position(|t| t.id == id) else {
      return false;
    };
    if let Some(task) = self.resumed.remove(at) {
      self.paused.insert(id, task);
    }
    true
  }

  /// Removes the task from whichever pool holds it.
  pub fn cancel(&mut self, id: TaskId) -> Option<PoolKind> {
    if self.active.remove(&id).is_some() {
      return Some(PoolKind::Active);
    }
    if self.paused.remove(&id).is_some() {
      return Some(PoolKind::Paused);
    }
    if let Some(at) = self.resumed.iter().position(|t| t.id == id) {
      self.resumed.remove(at);
      return Some(PoolKind::Resumed);
    }
    if let Some(at) = self.pending.iter().position(|t| t.id == id) {
      self.pending.remove(at);
      return Some(PoolKind::Pending);
    }
    None
  }

  /// *Active* → gone. Returns the finished task.
  pub fn complete(&mut self, id: TaskId) -> Option<GameTask> {
    self.active.remove(&id)
  }

  /// Advances every active task by `delta_ms`, clamping at the duration.
  ///
  /// Returns the ids of tasks that reached completion, for the caller to
  /// run `complete` on.
  pub fn advance_active(&mut self, delta_ms: u64) -> Vec<TaskId> {
    let mut done = Vec::new();
    for task in self.active.values_mut() {
      task.elapsed_ms = (task.elapsed_ms + delta_ms).min(task.duration_ms);
      if task.is_complete() {
        done.push(task.id);
      }
    }
    done
  }

  /// Head of the combined *Resumed*-then-*Pending* queue.
  pub fn queue_head(&self) -> Option<&GameTask> {
    self.resumed.front().or_else(|| self.pending.front())
  }

  /// True if a task is waiting and the queue head does not fit.
  pub fn head_blocked(&self, coefficient: u32) -> bool {
    match self.queue_head() {
      Some(head) => !self.can_fit(head.cost, coefficient),
      None => false,
    }
  }

  /// Sequential admission pass.
  ///
  /// Strictly ordered: *Resumed* is drained from the head while its head
  /// fits; *Pending* is only considered once *Resumed* is empty. A head
  /// that does not fit blocks everything behind it.
  ///
  /// Returns each admitted id with the pool it came from.
  pub fn admit_sequential(&mut self, coefficient: u32) -> Vec<(TaskId, PoolKind)> {
    let mut admitted = Vec::new();
    loop {
      let from = if !self.resumed.is_empty() {
        PoolKind::Resumed
      } else if !self.pending.is_empty() {
        PoolKind::Pending
      } else {
        break;
      };
      let head_cost = match from {
        PoolKind::Resumed => self.resumed.front().map(|t| t.cost),
        _ => self.pending.front().map(|t| t.cost),
      };
      let Some(cost) = head_cost else {
        break;
      };
      if !self.can_fit(cost, coefficient) {
        break;
      }

      let task = match from {
        PoolKind::Resumed => self.resumed.pop_front(),
        _ => self.pending.pop_front(),
      };
      let Some(task) = task else {
        break;
      };
      admitted.push((task.id, from));
      self.active.insert(task.id, task);
    }
    admitted
  }

  /// Greedy backfill pass.
  ///
  /// Walks *Resumed* then *Pending* in order and admits every task that
  /// fits right now, skipping larger ones.
  pub fn admit_greedy(&mut self, coefficient: u32) -> Vec<(TaskId, PoolKind)> {
    let mut admitted = Vec::new();
    Self::greedy_pass(
      &mut self.resumed,
      &mut self.active,
      PoolKind::Resumed,
      coefficient,
      &mut admitted,
    );
    Self::greedy_pass(
      &mut self.pending,
      &mut self.active,
      PoolKind::Pending,
      coefficient,
      &mut admitted,
    );
    admitted
  }

  fn greedy_pass(
    queue: &mut VecDeque<GameTask>,
    active: &mut HashMap<TaskId, GameTask>,
    from: PoolKind,
    coefficient: u32,
    admitted: &mut Vec<(TaskId, PoolKind)>,
  ) {
    let mut at = 0;
    while at < queue.len() {
      let cost = queue[at].cost as u64;
      let used: u64 = active.values().map(|t| t.cost as u64).sum();
      if coefficient > 0 && used + cost <= coefficient as u64 {
        if let Some(task) = queue.remove(at) {
          admitted.push((task.id, from));
          active.insert(task.id, task);
        }
      } else {
        at += 1;
      }
    }
  }
}
