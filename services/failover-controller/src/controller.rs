use crate::config::Topology;
use crate::director::{DecisionReason, FailbackPolicy, FailoverDecision, FailoverDirector};
use crate::liveness::{LivenessSnapshot, LivenessState};
use crate::region::{ActiveEndpoint, Region, RegionName, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("unknown region `{0}`")]
    UnknownRegion(RegionName),
    #[error("controller is no longer running")]
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ControlCommand {
    ForceActivate { region: RegionName },
    ClearOverride,
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionStatus {
    pub name: RegionName,
    pub role: Role,
    pub endpoint: String,
    pub liveness: LivenessSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub active_region: Option<RegionName>,
    pub reason: Option<DecisionReason>,
    pub decided_at: Option<DateTime<Utc>>,
    pub manual_override: Option<RegionName>,
    pub regions: Vec<RegionStatus>,
}

struct RegionSlot {
    region: Region,
    liveness: LivenessSnapshot,
}

/// Latest liveness of both regions plus the decision memory. All operations
/// are synchronous and do no I/O.
pub struct Controller {
    director: FailoverDirector,
    primary: RegionSlot,
    secondary: RegionSlot,
    decision: Option<FailoverDecision>,
    manual_override: Option<RegionName>,
}

impl Controller {
    pub fn new(topology: Topology, policy: FailbackPolicy) -> Self {
        let director = FailoverDirector::new(
            topology.primary.name.clone(),
            topology.secondary.name.clone(),
            policy,
        );

        Self {
            director,
            primary: RegionSlot {
                region: topology.primary,
                liveness: LivenessSnapshot::default(),
            },
            secondary: RegionSlot {
                region: topology.secondary,
                liveness: LivenessSnapshot::default(),
            },
            decision: None,
            manual_override: None,
        }
    }

    pub fn decision(&self) -> Option<&FailoverDecision> {
        self.decision.as_ref()
    }

    pub fn manual_override(&self) -> Option<&RegionName> {
        self.manual_override.as_ref()
    }

    pub fn region(&self, name: &RegionName) -> Option<&Region> {
        self.slot(name).map(|slot| &slot.region)
    }

    pub fn active_endpoint(&self) -> Option<ActiveEndpoint> {
        let decision = self.decision.as_ref()?;
        self.region(&decision.active_region).map(Region::endpoint)
    }

    /// Stores the latest snapshot for `region` and re-evaluates.
    pub fn record_liveness(
        &mut self,
        region: &RegionName,
        liveness: LivenessSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<FailoverDecision>, ControlError> {
        let slot = self
            .slot_mut(region)
            .ok_or_else(|| ControlError::UnknownRegion(region.clone()))?;
        slot.liveness = liveness;

        Ok(self.evaluate(now))
    }

    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Option<FailoverDecision> {
        if self.manual_override.is_some() {
            return self.decision.clone();
        }

        let next = self.director.decide(
            self.primary.liveness.state,
            self.secondary.liveness.state,
            self.decision.as_ref(),
            now,
        )?;
        self.adopt(next);
        self.decision.clone()
    }

    /// Pins `region` as active until [`Controller::clear_override`]. Forcing
    /// the region that is already forced changes nothing.
    pub fn force_activate(
        &mut self,
        region: &RegionName,
        now: DateTime<Utc>,
    ) -> Result<FailoverDecision, ControlError> {
        if self.slot(region).is_none() {
            return Err(ControlError::UnknownRegion(region.clone()));
        }

        if self.manual_override.as_ref() == Some(region) {
            if let Some(decision) = &self.decision {
                return Ok(decision.clone());
            }
        }

        self.manual_override = Some(region.clone());
        let next = FailoverDecision::succeed(
            self.decision.as_ref(),
            region.clone(),
            DecisionReason::ManualOverride,
            now,
        );
        warn!(region = %region, "Manual override: region forced active");
        self.adopt(next.clone());
        Ok(next)
    }

    /// Drops the manual override and hands control back to health checks.
    pub fn clear_override(&mut self, now: DateTime<Utc>) -> Option<FailoverDecision> {
        if let Some(region) = self.manual_override.take() {
            info!(region = %region, "Manual override cleared");
        }
        self.evaluate(now)
    }

    pub fn apply(
        &mut self,
        command: ControlCommand,
        now: DateTime<Utc>,
    ) -> Result<ControllerStatus, ControlError> {
        match command {
            ControlCommand::ForceActivate { region } => {
                self.force_activate(&region, now)?;
            }
            ControlCommand::ClearOverride => {
                self.clear_override(now);
            }
            ControlCommand::Status => {}
        }
        Ok(self.status())
    }

    pub fn status(&self) -> ControllerStatus {
        let regions = [&self.primary, &self.secondary]
            .into_iter()
            .map(|slot| RegionStatus {
                name: slot.region.name.clone(),
                role: slot.region.role,
                endpoint: slot.region.target.host().to_string(),
                liveness: slot.liveness,
            })
            .collect();

        ControllerStatus {
            active_region: self.decision.as_ref().map(|d| d.active_region.clone()),
            reason: self.decision.as_ref().map(|d| d.reason),
            decided_at: self.decision.as_ref().map(|d| d.decided_at),
            manual_override: self.manual_override.clone(),
            regions,
        }
    }

    pub fn liveness(&self, name: &RegionName) -> Option<LivenessState> {
        self.slot(name).map(|slot| slot.liveness.state)
    }

    fn adopt(&mut self, next: FailoverDecision) {
        if next.switched_from(self.decision.as_ref()) {
            info!(
                active_region = %next.active_region,
                previous = ?self.decision.as_ref().map(|d| d.active_region.as_str()),
                reason = %next.reason,
                "Active region changed"
            );
        } else if self.decision.as_ref().map(|d| d.reason) != Some(next.reason) {
            debug!(
                active_region = %next.active_region,
                reason = %next.reason,
                "Active region unchanged, reason updated"
            );
        }
        self.decision = Some(next);
    }

    fn slot(&self, name: &RegionName) -> Option<&RegionSlot> {
        [&self.primary, &self.secondary]
            .into_iter()
            .find(|slot| &slot.region.name == name)
    }

    fn slot_mut(&mut self, name: &RegionName) -> Option<&mut RegionSlot> {
        if &self.primary.region.name == name {
            Some(&mut self.primary)
        } else if &self.secondary.region.name == name {
            Some(&mut self.secondary)
        } else {
            None
        }
    }
}
