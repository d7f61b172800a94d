//! Agent lifecycle state machine.
//!
//! A single atomic cell holds the current [`AgentState`]. Every mutation goes
//! through [`Lifecycle::set_state`], which validates the pair against the
//! transition table and then compare-and-swaps, so exactly one of several
//! racing callers leaving a state wins.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use strum::{Display, EnumIter, EnumString};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum AgentState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Paused = 3,
    Stopping = 4
}

impl AgentState {
    fn from_repr(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Stopping,
            _ => Self::Stopped
        }
    }

    /// States reachable from `self` in one step.
    pub fn allowed_targets(self) -> &'static [AgentState] {
        use AgentState::*;
        match self {
            Stopped => &[Starting],
            Starting => &[Running, Stopping],
            Running => &[Paused, Stopping],
            Paused => &[Running, Stopping],
            Stopping => &[Stopped]
        }
    }

    pub fn can_transition_to(self, target: AgentState) -> bool {
        self.allowed_targets().contains(&target)
    }
}

/// Shared lifecycle cell for one agent.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    changed: watch::Sender<u64>
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// A fresh lifecycle starts in [`AgentState::Stopped`].
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            state: AtomicU8::new(AgentState::Stopped as u8),
            changed
        }
    }

    pub fn state(&self) -> AgentState {
        AgentState::from_repr(self.state.load(Ordering::SeqCst))
    }

    /// Attempts the transition from the current state to `target`.
    ///
    /// Returns `false` without touching the cell when the pair is not in the
    /// transition table, or when another caller changed the state between
    /// the load and the swap.
    pub fn set_state(&self, target: AgentState) -> bool {
        let current = self.state();
        if !current.can_transition_to(target) {
            warn!(from = %current, to = %target, "Rejected invalid state transition");
            return false;
        }

        let swapped = self
            .state
            .compare_exchange(
                current as u8,
                target as u8,
                Ordering::SeqCst,
                Ordering::SeqCst
            )
            .is_ok();

        if swapped {
            info!(from = %current, to = %target, "Agent state changed");
            self.changed.send_modify(|tick| *tick = tick.wrapping_add(1));
        }
        swapped
    }

    pub fn is_running(&self) -> bool {
        self.state() == AgentState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state() == AgentState::Paused
    }

    /// True while stopping and once stopped.
    pub fn is_stopping(&self) -> bool {
        matches!(self.state(), AgentState::Stopping | AgentState::Stopped)
    }

    /// Ticks once per successful transition.
    pub fn changed(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    /// Resolves as soon as the state is anything other than RUNNING.
    pub async fn wait_until_not_running(&self) {
        let mut changes = self.changed.subscribe();
        while self.is_running() {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}
