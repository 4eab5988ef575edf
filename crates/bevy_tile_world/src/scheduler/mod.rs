//! Attention scheduler.
//!
//! Admits long-running game tasks into a bounded attention budget. Tasks
//! wait in FIFO pools (*Resumed* ahead of *Pending*), progress only while
//! *Active*, and freeze in *Paused*. Admission passes are debounced;
//! an optional greedy backfill pass fires after a long delay when the
//! queue head cannot fit.
//!
//! The scheduler persists every pool transition through the world store
//! via a change journal and refuses new tasks until it has hydrated from
//! the store's authoritative snapshot.

mod systems;

use std::fmt;
use std::time::Duration;

use bevy::prelude::*;
use serde_json::Value;
use tile_world::{
  GameTask, PoolKind, PoolSnapshot, TaskId, TaskIdGenerator, TaskPools, TaskSpec, TaskSpecError,
};

use crate::TileWorldSet;
use crate::config::SchedulerConfig;

pub(crate) use systems::{
  advance_active_tasks, flush_scheduler_journal, hydrate_scheduler, run_admission, run_greedy,
};

/// Errors from the scheduler's public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
  /// The scheduler has not yet absorbed the store's persisted state.
  NotHydrated,
  /// The task spec failed validation.
  InvalidSpec(TaskSpecError),
}

impl fmt::Display for SchedulerError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NotHydrated => write!(f, "scheduler has not hydrated from the world store yet"),
      Self::InvalidSpec(e) => write!(f, "invalid task spec: {}", e),
    }
  }
}

impl std::error::Error for SchedulerError {}

/// A task finished its full duration.
///
/// The scheduler does not interpret task kinds; hosts read these messages
/// and act on the payload.
#[derive(Message, Clone, Debug)]
pub struct TaskCompleted {
  pub id: TaskId,
  pub kind: String,
  pub payload: Value,
}

/// One pool transition to replicate into the world store.
#[derive(Clone, Debug)]
pub(crate) enum PoolChange {
  Pushed(GameTask),
  Moved {
    id: TaskId,
    from: PoolKind,
    to: PoolKind,
  },
  Removed {
    id: TaskId,
    from: PoolKind,
  },
  Progress(Vec<(TaskId, u64)>),
  LimitSet(u32),
}

/// The scheduler state and public API.
///
/// Host systems call the transition methods; the plugin's systems run the
/// debounced admission passes, the progression tick, and the journal flush.
#[derive(Resource)]
pub struct AttentionScheduler {
  pools: TaskPools,
  coefficient: u32,
  greedy_enabled: bool,
  hydrated: bool,
  ids: TaskIdGenerator,
  admission: Option<Timer>,
  greedy: Option<Timer>,
  tick: Timer,
  tick_running: bool,
  accumulated: Duration,
  journal: Vec<PoolChange>,
  admission_debounce: Duration,
  greedy_delay: Duration,
}

impl AttentionScheduler {
  /// Creates an empty, un-hydrated scheduler.
  pub fn new(config: &SchedulerConfig) -> Self {
    Self {
      pools: TaskPools::new(),
      coefficient: 0,
      greedy_enabled: false,
      hydrated: false,
      ids: TaskIdGenerator::new(),
      admission: None,
      greedy: None,
      tick: Timer::new(Duration::from_millis(config.tick_ms.max(1)), TimerMode::Repeating),
      tick_running: false,
      accumulated: Duration::ZERO,
      journal: Vec::new(),
      admission_debounce: Duration::from_millis(config.admission_debounce_ms),
      greedy_delay: Duration::from_millis(config.greedy_delay_ms),
    }
  }

  /// True once the persisted snapshot has been absorbed.
  pub fn is_hydrated(&self) -> bool {
    self.hydrated
  }

  /// Absorbs the store's persisted pools and attention limit.
  ///
  /// The persisted coefficient is authoritative. A fresh sequential pass is
  /// scheduled; the greedy delay is runtime-only and never restored.
  pub(crate) fn hydrate(&mut self, snapshot: PoolSnapshot, attention_limit: u32) {
    for task in snapshot.iter() {
      self.ids.seed_above(task.id);
    }
    self.pools = TaskPools::from_snapshot(snapshot);
    self.coefficient = attention_limit;
    self.hydrated = true;
    self.schedule_admission();
  }

  /// Current attention coefficient.
  pub fn coefficient(&self) -> u32 {
    self.coefficient
  }

  /// Used fraction of the attention budget.
  pub fn used_attention(&self) -> f64 {
    self.pools.used_attention(self.coefficient)
  }

  /// Free fraction of the attention budget.
  pub fn free_attention(&self) -> f64 {
    self.pools.free_attention(self.coefficient)
  }

  /// Read access to the pools.
  pub fn pools(&self) -> &TaskPools {
    &self.pools
  }

  /// Looks a task up across all pools.
  pub fn get(&self, id: TaskId) -> Option<&GameTask> {
    self.pools.get(id)
  }

  /// Appends a new task to *Pending* and triggers admission.
  ///
  /// Rejected until hydration: the store's persisted attention coefficient
  /// is authoritative and must be read first.
  pub fn add_task(&mut self, spec: TaskSpec) -> Result<TaskId, SchedulerError> {
    if !self.hydrated {
      debug!("add_task: scheduler not hydrated yet");
      return Err(SchedulerError::NotHydrated);
    }
    let id = self.ids.next_id();
    let task = match GameTask::from_spec(id, spec) {
      Ok(task) => task,
      Err(e) => {
        debug!("add_task: rejected spec ({})", e);
        return Err(SchedulerError::InvalidSpec(e));
      }
    };
    self.journal.push(PoolChange::Pushed(task.clone()));
    self.pools.push_pending(task);
    self.schedule_admission();
    Ok(id)
  }

  /// *Active* → *Paused*. Frees capacity, so admission is scheduled.
  pub fn pause(&mut self, id: TaskId) -> bool {
    if !self.pools.pause(id) {
      debug!("pause: {} is not active", id);
      return false;
    }
    self.journal.push(PoolChange::Moved {
      id,
      from: PoolKind::Active,
      to: PoolKind::Paused,
    });
    self.schedule_admission();
    true
  }

  /// *Paused* → *Resumed*. Adds a candidate, so admission is scheduled.
  pub fn resume(&mut self, id: TaskId) -> bool {
    if !self.pools.resume(id) {
      debug!("resume: {} is not paused", id);
      return false;
    }
    self.journal.push(PoolChange::Moved {
      id,
      from: PoolKind::Paused,
      to: PoolKind::Resumed,
    });
    self.schedule_admission();
    true
  }

  /// *Resumed* → *Paused*. No capacity was freed, so no admission runs.
  pub fn pause_resumed(&mut self, id: TaskId) -> bool {
    if !self.pools.pause_resumed(id) {
      debug!("pause_resumed: {} is not in resumed", id);
      return false;
    }
    self.journal.push(PoolChange::Moved {
      id,
      from: PoolKind::Resumed,
      to: PoolKind::Paused,
    });
    true
  }

  /// Removes a task from whichever pool holds it.
  pub fn cancel(&mut self, id: TaskId) -> bool {
    let Some(from) = self.pools.cancel(id) else {
      debug!("cancel: unknown task {}", id);
      return false;
    };
    self.journal.push(PoolChange::Removed { id, from });
    if from == PoolKind::Active {
      self.schedule_admission();
    }
    true
  }

  /// *Active* → gone. Returns the finished task for host interpretation.
  pub fn complete(&mut self, id: TaskId) -> Option<GameTask> {
    let task = self.pools.complete(id)?;
    self.journal.push(PoolChange::Removed {
      id,
      from: PoolKind::Active,
    });
    self.schedule_admission();
    Some(task)
  }

  /// Sets the attention coefficient. A strict raise triggers admission.
  pub fn set_attention_coefficient(&mut self, coefficient: u32) {
    let raised = coefficient > self.coefficient;
    if coefficient == self.coefficient {
      return;
    }
    self.coefficient = coefficient;
    self.journal.push(PoolChange::LimitSet(coefficient));
    if raised {
      self.schedule_admission();
    }
  }

  /// Enables or disables the greedy backfill pass. Disabling cancels an
  /// armed pass.
  pub fn set_greedy_enabled(&mut self, enabled: bool) {
    self.greedy_enabled = enabled;
    if !enabled {
      self.greedy = None;
    }
  }

  /// True if the greedy pass is enabled.
  pub fn is_greedy_enabled(&self) -> bool {
    self.greedy_enabled
  }

  /// True while a greedy pass is armed (test introspection).
  pub fn is_greedy_armed(&self) -> bool {
    self.greedy.is_some()
  }

  /// Arms the debounced admission pass, coalescing with one already armed.
  fn schedule_admission(&mut self) {
    if self.admission.is_none() {
      self.admission = Some(Timer::new(self.admission_debounce, TimerMode::Once));
    }
  }

  /// Arms the greedy pass when the queue head cannot fit.
  fn maybe_arm_greedy(&mut self) {
    if self.greedy_enabled
      && self.greedy.is_none()
      && self.pools.head_blocked(self.coefficient)
    {
      self.greedy = Some(Timer::new(self.greedy_delay, TimerMode::Once));
    }
  }

  /// Takes the accumulated pool changes for replication.
  pub(crate) fn drain_journal(&mut self) -> Vec<PoolChange> {
    std::mem::take(&mut self.journal)
  }
}

/// Internal plugin for the scheduler systems.
///
/// Added by the main `TileWorldPlugin`.
pub(crate) struct AttentionSchedulerPlugin;

impl Plugin for AttentionSchedulerPlugin {
  fn build(&self, app: &mut App) {
    let config = app
      .world()
      .get_resource::<SchedulerConfig>()
      .cloned()
      .unwrap_or_default();

    app.insert_resource(AttentionScheduler::new(&config));
    app.add_message::<TaskCompleted>();
    app.add_systems(
      Update,
      (
        hydrate_scheduler,
        run_admission,
        run_greedy,
        advance_active_tasks,
        flush_scheduler_journal,
      )
        .chain()
        .in_set(TileWorldSet::Scheduler),
    );
  }
}
