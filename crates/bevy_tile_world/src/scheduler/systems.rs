//! Scheduler systems: hydration, admission passes, time progression, and
//! journal replication into the world store.

use bevy::ecs::message::{MessageReader, MessageWriter};
use bevy::prelude::*;
use tile_world::{GameTask, PoolKind, TaskId};

use super::{AttentionScheduler, PoolChange, TaskCompleted};
use crate::store::{StoreCommand, StoreDispatcher, StoreReady};

/// System: Absorbs the store's persisted snapshot when it arrives.
pub(crate) fn hydrate_scheduler(
  mut ready: MessageReader<StoreReady>,
  scheduler: Option<ResMut<AttentionScheduler>>,
) {
  let Some(mut scheduler) = scheduler else {
    return;
  };
  for msg in ready.read() {
    info!(
      "Scheduler hydrated: coefficient {}, {} persisted tasks",
      msg.attention_limit,
      msg.pools.len()
    );
    scheduler.hydrate(msg.pools.clone(), msg.attention_limit);
  }
}

/// System: Runs the debounced sequential admission pass.
pub(crate) fn run_admission(time: Res<Time>, scheduler: Option<ResMut<AttentionScheduler>>) {
  let Some(mut scheduler) = scheduler else {
    return;
  };

  let fired = match &mut scheduler.admission {
    Some(timer) => timer.tick(time.delta()).finished(),
    None => false,
  };
  if !fired {
    return;
  }
  scheduler.admission = None;

  let coefficient = scheduler.coefficient;
  let admitted = scheduler.pools.admit_sequential(coefficient);
  for (id, from) in &admitted {
    scheduler.journal.push(PoolChange::Moved {
      id: *id,
      from: *from,
      to: PoolKind::Active,
    });
  }
  if !admitted.is_empty() {
    info!(
      "Admitted {} task(s); attention {:.2} used",
      admitted.len(),
      scheduler.used_attention()
    );
  }

  scheduler.maybe_arm_greedy();
}

/// System: Runs the delayed greedy backfill pass.
pub(crate) fn run_greedy(time: Res<Time>, scheduler: Option<ResMut<AttentionScheduler>>) {
  let Some(mut scheduler) = scheduler else {
    return;
  };

  let fired = match &mut scheduler.greedy {
    Some(timer) => timer.tick(time.delta()).finished(),
    None => false,
  };
  if !fired {
    return;
  }
  scheduler.greedy = None;

  if !scheduler.greedy_enabled {
    return;
  }

  let coefficient = scheduler.coefficient;
  let admitted = scheduler.pools.admit_greedy(coefficient);
  for (id, from) in &admitted {
    scheduler.journal.push(PoolChange::Moved {
      id: *id,
      from: *from,
      to: PoolKind::Active,
    });
  }
  if !admitted.is_empty() {
    info!("Greedy backfill admitted {} task(s)", admitted.len());
  }
}

/// System: Advances active tasks by wall-clock time, once per tick period.
///
/// The tick only accumulates while *Active* is non-empty, so paused and
/// queued tasks never gain progress. Completions fire `TaskCompleted`
/// messages and free capacity.
pub(crate) fn advance_active_tasks(
  time: Res<Time>,
  scheduler: Option<ResMut<AttentionScheduler>>,
  mut completions: MessageWriter<TaskCompleted>,
) {
  let Some(mut scheduler) = scheduler else {
    return;
  };

  if scheduler.pools.active_count() == 0 {
    scheduler.tick_running = false;
    return;
  }

  if !scheduler.tick_running {
    scheduler.tick_running = true;
    scheduler.tick.reset();
    scheduler.accumulated = std::time::Duration::ZERO;
  }

  scheduler.accumulated += time.delta();
  if !scheduler.tick.tick(time.delta()).just_finished() {
    return;
  }

  let delta_ms = scheduler.accumulated.as_millis() as u64;
  scheduler.accumulated = std::time::Duration::ZERO;

  let done = scheduler.pools.advance_active(delta_ms);

  let progress: Vec<(TaskId, u64)> = scheduler
    .pools
    .iter_active()
    .filter(|t| !done.contains(&t.id))
    .map(|t| (t.id, t.elapsed_ms))
    .collect();
  if !progress.is_empty() {
    scheduler.journal.push(PoolChange::Progress(progress));
  }

  for id in done {
    let Some(task) = scheduler.complete(id) else {
      continue;
    };
    info!("Task {} ({}) completed", task.id, task.kind);
    completions.write(TaskCompleted {
      id: task.id,
      kind: task.kind,
      payload: task.payload,
    });
  }
}

/// System: Replicates pool changes into the world store.
///
/// Consecutive pushes batch into one `PushTasks` command; everything else
/// maps one-to-one.
pub(crate) fn flush_scheduler_journal(
  scheduler: Option<ResMut<AttentionScheduler>>,
  dispatcher: Option<Res<StoreDispatcher>>,
) {
  let (Some(mut scheduler), Some(dispatcher)) = (scheduler, dispatcher) else {
    return;
  };
  if scheduler.journal.is_empty() || !dispatcher.is_ready() {
    return;
  }

  let mut push_batch: Vec<GameTask> = Vec::new();
  let flush_batch = |batch: &mut Vec<GameTask>, dispatcher: &StoreDispatcher| {
    if !batch.is_empty() {
      dispatcher.send(StoreCommand::PushTasks {
        tasks: std::mem::take(batch),
      });
    }
  };

  for change in scheduler.drain_journal() {
    match change {
      PoolChange::Pushed(task) => push_batch.push(task),
      PoolChange::Moved { id, from, to } => {
        flush_batch(&mut push_batch, &dispatcher);
        dispatcher.send(StoreCommand::MoveTask { id, from, to });
      }
      PoolChange::Removed { id, from } => {
        flush_batch(&mut push_batch, &dispatcher);
        dispatcher.send(StoreCommand::RemoveTask { id, from });
      }
      PoolChange::Progress(updates) => {
        flush_batch(&mut push_batch, &dispatcher);
        dispatcher.send(StoreCommand::UpdateActiveProgress { updates });
      }
      PoolChange::LimitSet(limit) => {
        flush_batch(&mut push_batch, &dispatcher);
        dispatcher.send(StoreCommand::SetAttentionLimit { limit });
      }
    }
  }
  flush_batch(&mut push_batch, &dispatcher);
}
