//! Per-stage run guard
//!
//! Each stage is `Idle`, `Running` or `Paused`. A trigger may only start a
//! stage that is idle; [`RunGuard::try_acquire`] hands out a [`RunPermit`]
//! that marks the stage running and puts it back to idle when dropped, also
//! when the stage returned early with an error or panicked.
//!
//! Pausing a running stage takes effect when its permit is released.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::metrics;
use crate::task::Stage;

/// State of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Idle,
    Running,
    Paused,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage could not be started
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardError {
    #[error("Stage {0} is already running")]
    AlreadyRunning(Stage),

    #[error("Stage {0} is paused")]
    Paused(Stage),
}

/// Snapshot of one stage for status endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub stage: Stage,
    pub state: StageState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_since: Option<DateTime<Utc>>,
    /// Pause requested while running
    pub pause_pending: bool,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: StageState,
    running_since: Option<DateTime<Utc>>,
    pause_pending: bool,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: StageState::Idle,
            running_since: None,
            pause_pending: false,
        }
    }
}

type Slots = BTreeMap<Stage, Slot>;

/// Shared coordinator preventing overlapping runs of the same stage
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    slots: Arc<Mutex<Slots>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // The map is always left consistent, so a poisoned lock is still usable
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state of `stage`
    pub fn state(&self, stage: Stage) -> StageState {
        self.lock().get(&stage).map_or(StageState::Idle, |slot| slot.state)
    }

    /// Whether a trigger may start `stage` now
    pub fn can_run(&self, stage: Stage) -> bool {
        self.state(stage) == StageState::Idle
    }

    /// Mark `stage` running, or report why it cannot run
    pub fn try_acquire(&self, stage: Stage) -> Result<RunPermit, GuardError> {
        let mut slots = self.lock();
        let slot = slots.entry(stage).or_default();

        match slot.state {
            StageState::Running => return Err(GuardError::AlreadyRunning(stage)),
            StageState::Paused => return Err(GuardError::Paused(stage)),
            StageState::Idle => {}
        }

        slot.state = StageState::Running;
        slot.running_since = Some(Utc::now());
        metrics::set_stage_running(stage.as_str(), true);
        tracing::debug!(stage = %stage, "Stage acquired");

        Ok(RunPermit {
            stage,
            slots: Arc::clone(&self.slots),
        })
    }

    /// Stop triggers from starting `stage`
    ///
    /// Returns the state after the call; a running stage stays running and
    /// becomes paused once it finishes.
    pub fn pause(&self, stage: Stage) -> StageState {
        let mut slots = self.lock();
        let slot = slots.entry(stage).or_default();

        match slot.state {
            StageState::Idle => slot.state = StageState::Paused,
            StageState::Running => slot.pause_pending = true,
            StageState::Paused => {}
        }
        tracing::info!(stage = %stage, state = %slot.state, "Stage paused");
        slot.state
    }

    /// Allow triggers to start `stage` again
    pub fn resume(&self, stage: Stage) -> StageState {
        let mut slots = self.lock();
        let slot = slots.entry(stage).or_default();

        match slot.state {
            StageState::Paused => slot.state = StageState::Idle,
            StageState::Running => slot.pause_pending = false,
            StageState::Idle => {}
        }
        tracing::info!(stage = %stage, state = %slot.state, "Stage resumed");
        slot.state
    }

    /// Status of every stage, in pipeline order
    pub fn snapshot(&self) -> Vec<StageStatus> {
        let slots = self.lock();
        Stage::ALL
            .iter()
            .map(|&stage| {
                let slot = slots.get(&stage).copied().unwrap_or_default();
                StageStatus {
                    stage,
                    state: slot.state,
                    running_since: slot.running_since,
                    pause_pending: slot.pause_pending,
                }
            })
            .collect()
    }
}

/// Proof that a stage is running; releases it on drop
#[derive(Debug)]
pub struct RunPermit {
    stage: Stage,
    slots: Arc<Mutex<Slots>>,
}

impl RunPermit {
    pub fn stage(&self) -> Stage {
        self.stage
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(self.stage).or_default();

        slot.state = if slot.pause_pending {
            StageState::Paused
        } else {
            StageState::Idle
        };
        slot.running_since = None;
        slot.pause_pending = false;

        metrics::set_stage_running(self.stage.as_str(), false);
        tracing::debug!(stage = %self.stage, state = %slot.state, "Stage released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let guard = RunGuard::new();
        let permit = guard.try_acquire(Stage::Generate).unwrap();

        assert_eq!(guard.state(Stage::Generate), StageState::Running);
        assert_eq!(
            guard.try_acquire(Stage::Generate).unwrap_err(),
            GuardError::AlreadyRunning(Stage::Generate)
        );

        drop(permit);
        assert!(guard.can_run(Stage::Generate));
    }

    #[test]
    fn test_stages_are_independent() {
        let guard = RunGuard::new();
        let _schedule = guard.try_acquire(Stage::Schedule).unwrap();

        assert!(guard.can_run(Stage::Generate));
        assert!(guard.try_acquire(Stage::Publish).is_ok());
    }

    #[test]
    fn test_pause_and_resume() {
        let guard = RunGuard::new();

        assert_eq!(guard.pause(Stage::Publish), StageState::Paused);
        assert_eq!(
            guard.try_acquire(Stage::Publish).unwrap_err(),
            GuardError::Paused(Stage::Publish)
        );

        assert_eq!(guard.resume(Stage::Publish), StageState::Idle);
        assert!(guard.try_acquire(Stage::Publish).is_ok());
    }

    #[test]
    fn test_pause_while_running_applies_on_release() {
        let guard = RunGuard::new();
        let permit = guard.try_acquire(Stage::Schedule).unwrap();

        assert_eq!(guard.pause(Stage::Schedule), StageState::Running);
        drop(permit);

        assert_eq!(guard.state(Stage::Schedule), StageState::Paused);
    }

    #[test]
    fn test_permit_released_on_panic() {
        let guard = RunGuard::new();
        let cloned = guard.clone();

        let result = std::panic::catch_unwind(move || {
            let _permit = cloned.try_acquire(Stage::Generate).unwrap();
            panic!("stage blew up");
        });

        assert!(result.is_err());
        assert!(guard.can_run(Stage::Generate));
    }

    #[test]
    fn test_snapshot_lists_every_stage() {
        let guard = RunGuard::new();
        let _permit = guard.try_acquire(Stage::Generate).unwrap();

        let snapshot = guard.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].state, StageState::Idle);
        assert_eq!(snapshot[1].state, StageState::Running);
        assert!(snapshot[1].running_since.is_some());
    }
}
