//! In-memory fleet for dry runs and tests.

use super::{ensure_ready, CapacityBounds, Inventory, InventoryError, SettleDown, Status};
use crate::config::duration;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct FakeInventoryConfig {
    #[serde(default = "default_initial_size")]
    pub initial_size: i64,

    #[serde(default)]
    pub minimum_instances: Option<i64>,

    #[serde(default)]
    pub maximum_instances: Option<i64>,

    #[serde(default, deserialize_with = "duration::deserialize")]
    pub settle_down_period: Duration,
}

fn default_initial_size() -> i64 {
    10
}

impl Default for FakeInventoryConfig {
    fn default() -> Self {
        Self {
            initial_size: default_initial_size(),
            minimum_instances: None,
            maximum_instances: None,
            settle_down_period: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct FleetState {
    size: i64,
    backend_status: Status,
    mutations: u64,
}

/// A counter standing in for a real fleet.
///
/// The backend status can be forced with [`FakeInventory::set_backend_status`]
/// to rehearse in-flight and failed states.
#[derive(Debug)]
pub struct FakeInventory {
    state: Mutex<FleetState>,
    bounds: CapacityBounds,
    settle: SettleDown,
}

impl FakeInventory {
    pub fn new(config: &FakeInventoryConfig) -> Self {
        Self {
            state: Mutex::new(FleetState {
                size: config.initial_size,
                backend_status: Status::Ok,
                mutations: 0,
            }),
            bounds: CapacityBounds::new(config.minimum_instances, config.maximum_instances),
            settle: SettleDown::new(config.settle_down_period),
        }
    }

    pub fn with_size(size: i64) -> Self {
        Self::new(&FakeInventoryConfig {
            initial_size: size,
            ..FakeInventoryConfig::default()
        })
    }

    pub fn set_backend_status(&self, status: Status) {
        self.lock().backend_status = status;
    }

    /// Number of accepted mutations so far.
    pub fn mutations(&self) -> u64 {
        self.lock().mutations
    }

    pub fn size(&self) -> i64 {
        self.lock().size
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FleetState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Inventory for FakeInventory {
    async fn total(&self) -> Result<i64, InventoryError> {
        Ok(self.size())
    }

    async fn status(&self) -> Result<Status, InventoryError> {
        let backend_status = self.lock().backend_status;
        if backend_status == Status::Ok && self.settle.is_settling() {
            return Ok(Status::Updating);
        }
        Ok(backend_status)
    }

    async fn scale(&self, amount: i64) -> Result<(), InventoryError> {
        ensure_ready(self.status().await?)?;

        let new_size = {
            let mut state = self.lock();
            let new_size = state.size + amount;
            self.bounds.check(new_size)?;
            state.size = new_size;
            state.mutations += 1;
            new_size
        };
        self.settle.record_modification();

        info!(amount, new_size, "Scaled fake inventory");
        Ok(())
    }
}
