//! Per-container and per-service decisions.
//!
//! Precedence for a container of a monitored service:
//! 1. a `start_count` higher than the persisted one is reported as a
//!    restart and health is not looked at for this pass,
//! 2. otherwise the counter is recorded and the health state decides.

use std::collections::HashSet;

use crate::events::Status;
use crate::metadata::{ContainerRecord, ServiceRecord};
use crate::state::ContainerStates;

pub const HEALTHY: &str = "healthy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Monitoring is disabled on the owning service
    Disabled,
    Healthy,
    /// No health check configured on the container
    Unmonitored,
    Unhealthy,
    RestartedSinceLastCheck,
    /// Listed by its service but unknown to the metadata API
    Missing,
}

impl Outcome {
    pub fn status(self) -> Status {
        match self {
            Self::Disabled | Self::Healthy => Status::Ok,
            Self::Unmonitored | Self::RestartedSinceLastCheck => Status::Warning,
            Self::Unhealthy => Status::Critical,
            Self::Missing => Status::Unknown,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Disabled => "not monitored (disabled)",
            Self::Healthy => "is healthy",
            Self::Unmonitored => "not monitored",
            Self::Unhealthy => "is not healthy",
            Self::RestartedSinceLastCheck => "has restarted",
            Self::Missing => "not found in metadata",
        }
    }
}

/// Result of comparing the running containers against the declared scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    Healthy,
    Degraded { current: usize, scale: u32 },
}

impl ServiceOutcome {
    pub fn of(service: &ServiceRecord) -> Self {
        let current = service.containers.len();
        let scale = service.scale;
        if current < scale as usize {
            Self::Degraded { current, scale }
        } else {
            Self::Healthy
        }
    }

    pub fn status(self) -> Status {
        match self {
            Self::Healthy => Status::Ok,
            Self::Degraded { .. } => Status::Warning,
        }
    }

    pub fn message(self) -> String {
        match self {
            Self::Healthy => "Service is healthy".to_string(),
            Self::Degraded { current, scale } => format!(
                "Service is in a degraded state - Current: {current} (Scale: {scale})"
            ),
        }
    }
}

/// Counters driving the final result of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub unhealthy: usize,
    pub unmonitored: usize,
    pub missing: usize,
}

impl Tally {
    pub fn status(&self) -> Status {
        if self.unhealthy > 0 {
            Status::Critical
        } else if self.unmonitored + self.missing > 0 {
            Status::Warning
        } else {
            Status::Ok
        }
    }

    pub fn message(&self) -> String {
        match self.status() {
            Status::Critical => format!("Found {} unhealthy instances", self.unhealthy),
            Status::Warning => format!(
                "Found {} instances not being monitored",
                self.unmonitored + self.missing
            ),
            _ => "All Rancher services instances are healthy".to_string(),
        }
    }
}

/// Applies the decision rules to the containers of one pass, updating the
/// restart counters in place.
pub struct Evaluator<'a> {
    state: &'a mut ContainerStates,
    tally: Tally,
}

impl<'a> Evaluator<'a> {
    pub fn new(state: &'a mut ContainerStates) -> Self {
        Self {
            state,
            tally: Tally::default(),
        }
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    /// Containers of services with monitoring disabled are not tracked.
    pub fn disabled(&self) -> Outcome {
        Outcome::Disabled
    }

    /// Drops the counters of containers no longer listed by any service.
    pub fn forget_unlisted(&mut self, listed: &HashSet<&str>) {
        let before = self.state.len();
        self.state.retain(|id| listed.contains(id));
        let removed = before - self.state.len();
        if removed > 0 {
            log::info!("Forgot {removed} containers no longer listed");
        }
    }

    pub fn observe(&mut self, id: &str, record: Option<&ContainerRecord>) -> Outcome {
        let Some(record) = record else {
            self.tally.missing += 1;
            return Outcome::Missing;
        };

        let previous = self.state.get(id);
        if let Some(current) = record.start_count {
            self.state.record(id, current);
            if let Some(prev) = previous.filter(|prev| current > prev.restart_count) {
                log::info!(
                    "Container {id} restarted since last check ({} -> {current})",
                    prev.restart_count
                );
                return Outcome::RestartedSinceLastCheck;
            }
        }

        match record.health_state.as_deref() {
            Some(HEALTHY) => Outcome::Healthy,
            None => {
                self.tally.unmonitored += 1;
                Outcome::Unmonitored
            }
            Some(_) => {
                self.tally.unhealthy += 1;
                Outcome::Unhealthy
            }
        }
    }
}
