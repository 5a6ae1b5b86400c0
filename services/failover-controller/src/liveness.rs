//! Per-region liveness state machine.
//!
//! ```text
//! UNHEALTHY -> HEALTHY    healthy_threshold consecutive successes
//! HEALTHY   -> UNHEALTHY  unhealthy_threshold consecutive failures
//! ```
//!
//! A verdict that breaks a streak resets the opposing counter without
//! flipping state. A region starts out unhealthy.

use health_check::ProbeResult;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_HEALTHY_THRESHOLD: u32 = 2;
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LivenessState {
    Healthy,
    #[default]
    Unhealthy,
}

impl LivenessState {
    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }
}

impl fmt::Display for LivenessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub healthy: u32,
    pub unhealthy: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            healthy: DEFAULT_HEALTHY_THRESHOLD,
            unhealthy: DEFAULT_UNHEALTHY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LivenessState,
    pub to: LivenessState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LivenessSnapshot {
    pub state: LivenessState,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone)]
pub struct LivenessEvaluator {
    thresholds: Thresholds,
    state: LivenessState,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

impl LivenessEvaluator {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: LivenessState::Unhealthy,
            consecutive_successes: 0,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn snapshot(&self) -> LivenessSnapshot {
        LivenessSnapshot {
            state: self.state,
            consecutive_successes: self.consecutive_successes,
            consecutive_failures: self.consecutive_failures,
        }
    }

    pub fn observe(&mut self, result: &ProbeResult) -> Option<Transition> {
        self.record(result.is_success())
    }

    pub fn record(&mut self, success: bool) -> Option<Transition> {
        let from = self.state;

        if success {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            if from == LivenessState::Unhealthy
                && self.consecutive_successes >= self.thresholds.healthy
            {
                self.state = LivenessState::Healthy;
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if from == LivenessState::Healthy
                && self.consecutive_failures >= self.thresholds.unhealthy
            {
                self.state = LivenessState::Unhealthy;
            }
        }

        (from != self.state).then_some(Transition {
            from,
            to: self.state,
        })
    }
}

impl Default for LivenessEvaluator {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
