//! One control cycle for one fleet: evaluate, then act on the recommendation.

use crate::inventory::Inventory;
use crate::strategy::{Recommendation, Strategy, StrategyError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Which mutations a manager may perform. A disabled direction still
/// evaluates and logs what it would have done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingPolicy {
    pub scale_up: bool,
    pub scale_down: bool,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            scale_up: true,
            scale_down: true,
        }
    }
}

/// Result of a completed cycle.
///
/// `Held` needs no action. The advisory variants mean a mutation was
/// suppressed by policy. The refused variants carry the inventory's reason
/// and are retried on the next cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Held,
    ScaledUp,
    ScaledDown,
    WouldScaleUp,
    WouldScaleDown,
    ScaleUpRefused(String),
    ScaleDownRefused(String),
}

impl CycleOutcome {
    pub fn is_advisory(&self) -> bool {
        matches!(self, CycleOutcome::WouldScaleUp | CycleOutcome::WouldScaleDown)
    }

    pub fn is_refused(&self) -> bool {
        matches!(
            self,
            CycleOutcome::ScaleUpRefused(_) | CycleOutcome::ScaleDownRefused(_)
        )
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Held => write!(f, "held"),
            CycleOutcome::ScaledUp => write!(f, "scaled up"),
            CycleOutcome::ScaledDown => write!(f, "scaled down"),
            CycleOutcome::WouldScaleUp => write!(f, "would have scaled up"),
            CycleOutcome::WouldScaleDown => write!(f, "would have scaled down"),
            CycleOutcome::ScaleUpRefused(reason) => write!(f, "can't scale up: {}", reason),
            CycleOutcome::ScaleDownRefused(reason) => write!(f, "can't scale down: {}", reason),
        }
    }
}

/// Backend names a manager was wired with, carried on its log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backends {
    pub inventory: &'static str,
    pub monitor: &'static str,
    pub strategy: &'static str,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            inventory: "custom",
            monitor: "custom",
            strategy: "custom",
        }
    }
}

/// A cycle that could not reach a decision.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("strategy evaluation failed: {0}")]
    Strategy(#[from] StrategyError),
}

pub struct Manager {
    name: String,
    strategy: Arc<dyn Strategy>,
    inventory: Arc<dyn Inventory>,
    policy: ScalingPolicy,
    backends: Backends,
}

impl Manager {
    pub fn new(
        name: impl Into<String>,
        strategy: Arc<dyn Strategy>,
        inventory: Arc<dyn Inventory>,
        policy: ScalingPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            strategy,
            inventory,
            policy,
            backends: Backends::default(),
        }
    }

    pub fn with_backends(mut self, backends: Backends) -> Self {
        self.backends = backends;
        self
    }

    pub fn backends(&self) -> Backends {
        self.backends
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> ScalingPolicy {
        self.policy
    }

    /// Run one cycle. The inventory is never touched when evaluation fails.
    pub async fn run(&self) -> Result<CycleOutcome, ManagerError> {
        info!("Evaluating strategy");
        let recommendation = self.strategy.evaluate().await?;

        let Backends {
            inventory,
            monitor,
            strategy,
        } = self.backends;
        let outcome = match recommendation {
            Recommendation::Hold => {
                info!("Holding, no scaling needed");
                CycleOutcome::Held
            }
            Recommendation::ScaleUp if !self.policy.scale_up => {
                warn!(inventory, monitor, strategy, "Would have scaled up, but scale up is disabled");
                CycleOutcome::WouldScaleUp
            }
            Recommendation::ScaleDown if !self.policy.scale_down => {
                warn!(inventory, monitor, strategy, "Would have scaled down, but scale down is disabled");
                CycleOutcome::WouldScaleDown
            }
            Recommendation::ScaleUp => match self.inventory.increase().await {
                Ok(()) => {
                    warn!(inventory, monitor, strategy, "Scaled up");
                    CycleOutcome::ScaledUp
                }
                Err(e) => {
                    info!(error = %e, guard = e.is_guard(), inventory, "Can't scale up");
                    CycleOutcome::ScaleUpRefused(e.to_string())
                }
            },
            Recommendation::ScaleDown => match self.inventory.decrease().await {
                Ok(()) => {
                    warn!(inventory, monitor, strategy, "Scaled down");
                    CycleOutcome::ScaledDown
                }
                Err(e) => {
                    info!(error = %e, guard = e.is_guard(), inventory, "Can't scale down");
                    CycleOutcome::ScaleDownRefused(e.to_string())
                }
            },
        };

        Ok(outcome)
    }
}
