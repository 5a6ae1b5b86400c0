//! Chooses which region's DNS answer is authoritative.
//!
//! Policy, in order:
//! 1. primary healthy: activate primary
//! 2. secondary healthy: activate secondary
//! 3. both unhealthy: keep whatever was active before (fail open)
//!
//! With the default policy a recovered primary always wins, so traffic fails
//! back automatically and may cut over twice in a short window. `sticky`
//! keeps the current region while both are healthy; `min_failback_interval`
//! holds a fail-back until the secondary has been active for that long.
//! Neither keeps an unhealthy region active while the other is healthy.

use crate::liveness::LivenessState;
use crate::region::RegionName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    ManualOverride,
    PrimaryHealthy,
    SecondaryHealthy,
    StickyContinuity,
    FailbackHeld,
    AllUnhealthyRetained,
}

impl DecisionReason {
    pub fn is_health_driven(self) -> bool {
        self != Self::ManualOverride
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::ManualOverride => "manual-override",
            Self::PrimaryHealthy => "primary-healthy",
            Self::SecondaryHealthy => "secondary-healthy",
            Self::StickyContinuity => "sticky-continuity",
            Self::FailbackHeld => "failback-held",
            Self::AllUnhealthyRetained => "all-unhealthy-retained",
        };
        write!(f, "{}", reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailoverDecision {
    pub active_region: RegionName,
    pub reason: DecisionReason,
    pub decided_at: DateTime<Utc>,
    /// When `active_region` last became active.
    pub active_since: DateTime<Utc>,
}

impl FailoverDecision {
    /// Builds the decision that follows `previous`, carrying `active_since`
    /// over while the active region stays the same.
    pub fn succeed(
        previous: Option<&FailoverDecision>,
        active_region: RegionName,
        reason: DecisionReason,
        now: DateTime<Utc>,
    ) -> Self {
        let active_since = match previous {
            Some(prev) if prev.active_region == active_region => prev.active_since,
            _ => now,
        };
        Self {
            active_region,
            reason,
            decided_at: now,
            active_since,
        }
    }

    pub fn switched_from(&self, previous: Option<&FailoverDecision>) -> bool {
        previous.map_or(true, |prev| prev.active_region != self.active_region)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailbackPolicy {
    pub sticky: bool,
    pub min_failback_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct FailoverDirector {
    primary: RegionName,
    secondary: RegionName,
    policy: FailbackPolicy,
}

impl FailoverDirector {
    pub fn new(primary: RegionName, secondary: RegionName, policy: FailbackPolicy) -> Self {
        Self {
            primary,
            secondary,
            policy,
        }
    }

    pub fn primary(&self) -> &RegionName {
        &self.primary
    }

    pub fn secondary(&self) -> &RegionName {
        &self.secondary
    }

    pub fn policy(&self) -> FailbackPolicy {
        self.policy
    }

    /// Returns `None` only while no region has ever been activated and none
    /// is healthy.
    pub fn decide(
        &self,
        primary: LivenessState,
        secondary: LivenessState,
        previous: Option<&FailoverDecision>,
        now: DateTime<Utc>,
    ) -> Option<FailoverDecision> {
        let (active, reason) = match (primary, secondary) {
            (LivenessState::Healthy, LivenessState::Healthy) => self.both_healthy(previous, now),
            (LivenessState::Healthy, LivenessState::Unhealthy) => {
                (self.primary.clone(), DecisionReason::PrimaryHealthy)
            }
            (LivenessState::Unhealthy, LivenessState::Healthy) => {
                (self.secondary.clone(), DecisionReason::SecondaryHealthy)
            }
            (LivenessState::Unhealthy, LivenessState::Unhealthy) => {
                let prev = previous?;
                (prev.active_region.clone(), DecisionReason::AllUnhealthyRetained)
            }
        };

        Some(FailoverDecision::succeed(previous, active, reason, now))
    }

    fn both_healthy(
        &self,
        previous: Option<&FailoverDecision>,
        now: DateTime<Utc>,
    ) -> (RegionName, DecisionReason) {
        let on_secondary = previous.filter(|prev| prev.active_region == self.secondary);

        if let Some(prev) = on_secondary {
            if self.policy.sticky {
                return (self.secondary.clone(), DecisionReason::StickyContinuity);
            }

            let active_for = (now - prev.active_since).to_std().unwrap_or(Duration::ZERO);
            if active_for < self.policy.min_failback_interval {
                return (self.secondary.clone(), DecisionReason::FailbackHeld);
            }
        }

        (self.primary.clone(), DecisionReason::PrimaryHealthy)
    }
}
