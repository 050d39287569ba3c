//! Inventories are scalable fleets.
//!
//! Every mutation re-checks [`Inventory::status`] first and is refused unless
//! the fleet is [`Status::Ok`]. The check and the mutation are not atomic
//! against other actors; a change that slips in between surfaces as a backend
//! error from the mutating call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub mod aws;
pub mod fake;
pub mod marathon;

pub use aws::{AwsConfig, AwsInventory};
pub use fake::{FakeInventory, FakeInventoryConfig};
pub use marathon::{MarathonConfig, MarathonInventory};

/// Fitness of a fleet to accept a new mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No change in flight and past any settle-down window
    Ok,
    /// A previous change is still propagating or settling
    Updating,
    /// The backend reports a state that needs operator remediation
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Updating => write!(f, "updating"),
            Status::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Won't scale while changes are in progress")]
    Updating,

    #[error("Won't scale while something seems to be in a failed state")]
    Failed,

    #[error("Attempt to scale below minimum capacity denied: requested {requested}, minimum {minimum}")]
    BelowMinimum { requested: i64, minimum: i64 },

    #[error("Attempt to scale above maximum capacity denied: requested {requested}, maximum {maximum}")]
    AboveMaximum { requested: i64, maximum: i64 },

    #[error("No auto scaling group found for {0}")]
    GroupNotFound(String),

    #[error("Application not found at {0}")]
    ApplicationNotFound(String),

    #[error("fleet backend error: {0}")]
    Backend(String),

    #[error("fleet backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("instance metadata unavailable: {0}")]
    Metadata(String),
}

impl InventoryError {
    /// Whether the error is a refusal by one of the inventory's own guards
    /// rather than a failure talking to the backend.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            InventoryError::Updating
                | InventoryError::Failed
                | InventoryError::BelowMinimum { .. }
                | InventoryError::AboveMaximum { .. }
        )
    }
}

#[async_trait]
pub trait Inventory: Send + Sync {
    /// Current fleet size, read fresh from the backend.
    async fn total(&self) -> Result<i64, InventoryError>;

    async fn status(&self) -> Result<Status, InventoryError>;

    /// Change the fleet size by `amount`.
    async fn scale(&self, amount: i64) -> Result<(), InventoryError>;

    async fn increase(&self) -> Result<(), InventoryError> {
        self.scale(1).await
    }

    async fn decrease(&self) -> Result<(), InventoryError> {
        self.scale(-1).await
    }
}

/// Inventory backend selected by the `name` key of a manager's `inventory` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum InventoryConfig {
    Aws(AwsConfig),
    Marathon(MarathonConfig),
    Fake(FakeInventoryConfig),
}

impl InventoryConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            InventoryConfig::Aws(_) => "aws",
            InventoryConfig::Marathon(_) => "marathon",
            InventoryConfig::Fake(_) => "fake",
        }
    }
}

/// Refuse anything but [`Status::Ok`].
pub(crate) fn ensure_ready(status: Status) -> Result<(), InventoryError> {
    match status {
        Status::Ok => Ok(()),
        Status::Updating => Err(InventoryError::Updating),
        Status::Failed => Err(InventoryError::Failed),
    }
}

/// Minimum wait after a successful mutation before the next one is allowed.
///
/// Uses the tokio clock so paused-time tests can step through the window.
#[derive(Debug)]
pub struct SettleDown {
    period: Duration,
    last_modified: Mutex<Option<Instant>>,
}

impl SettleDown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_modified: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Call only after the backend accepted a mutation.
    pub fn record_modification(&self) {
        let mut last_modified = self
            .last_modified
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last_modified = Some(Instant::now());
    }

    pub fn is_settling(&self) -> bool {
        let last_modified = self
            .last_modified
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last_modified {
            // A window past the end of the clock never closes.
            Some(at) => at
                .checked_add(self.period)
                .map_or(true, |end| Instant::now() < end),
            None => false,
        }
    }
}

/// Optional floor and ceiling on the fleet size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacityBounds {
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
}

impl CapacityBounds {
    pub fn new(minimum: Option<i64>, maximum: Option<i64>) -> Self {
        Self { minimum, maximum }
    }

    pub fn check(&self, requested: i64) -> Result<(), InventoryError> {
        if let Some(minimum) = self.minimum {
            if requested < minimum {
                return Err(InventoryError::BelowMinimum { requested, minimum });
            }
        }
        if let Some(maximum) = self.maximum {
            if requested > maximum {
                return Err(InventoryError::AboveMaximum { requested, maximum });
            }
        }
        Ok(())
    }
}
