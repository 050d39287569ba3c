//! Builds managers from their configuration.
//!
//! Backend selection already happened when the document was parsed: every
//! `name` maps to one variant of a config enum. What is left here is turning
//! each variant into its backend and wiring the pieces together.

use crate::config::{AutoscalerConfig, ManagerConfig};
use crate::inventory::{
    AwsInventory, FakeInventory, Inventory, InventoryConfig, InventoryError, MarathonInventory,
};
use crate::manager::{Backends, Manager};
use crate::monitor::{
    DatadogMonitor, FakeMonitor, MesosMonitor, Monitor, MonitorConfig, MonitorError,
    NewRelicMonitor,
};
use crate::strategy::{RatioStrategy, Strategy, StrategyConfig, StrategyError, ThresholdStrategy};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("manager {manager}: cannot build {backend} monitor: {source}")]
    Monitor {
        manager: String,
        backend: &'static str,
        #[source]
        source: MonitorError,
    },

    #[error("manager {manager}: cannot build {backend} inventory: {source}")]
    Inventory {
        manager: String,
        backend: &'static str,
        #[source]
        source: InventoryError,
    },

    #[error("manager {manager}: invalid {strategy} strategy: {source}")]
    Strategy {
        manager: String,
        strategy: &'static str,
        #[source]
        source: StrategyError,
    },
}

/// Constructs backends for every configured manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct ComponentRegistry;

impl ComponentRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn build_monitor(&self, config: &MonitorConfig) -> Result<Arc<dyn Monitor>, MonitorError> {
        Ok(match config {
            MonitorConfig::Fake(fake) => Arc::new(FakeMonitor::new(fake)),
            MonitorConfig::Mesos(mesos) => Arc::new(MesosMonitor::from_config(mesos)?),
            MonitorConfig::Datadog(datadog) => Arc::new(DatadogMonitor::new(datadog)?),
            MonitorConfig::NewRelic(newrelic) => Arc::new(NewRelicMonitor::new(newrelic)?),
        })
    }

    pub fn build_inventory(
        &self,
        config: &InventoryConfig,
    ) -> Result<Arc<dyn Inventory>, InventoryError> {
        Ok(match config {
            InventoryConfig::Aws(aws) => Arc::new(AwsInventory::from_config(aws)?),
            InventoryConfig::Marathon(marathon) => Arc::new(MarathonInventory::new(marathon)?),
            InventoryConfig::Fake(fake) => Arc::new(FakeInventory::new(fake)),
        })
    }

    pub fn build_strategy(
        &self,
        config: &StrategyConfig,
        monitor: Arc<dyn Monitor>,
        inventory: Arc<dyn Inventory>,
    ) -> Result<Arc<dyn Strategy>, StrategyError> {
        Ok(match config {
            StrategyConfig::Ratio(ratio) => Arc::new(RatioStrategy::new(ratio, monitor, inventory)?),
            StrategyConfig::Threshold(threshold) => {
                Arc::new(ThresholdStrategy::new(threshold, monitor)?)
            }
        })
    }

    /// Wire one manager. Nothing is contacted over the network here.
    pub fn build_manager(&self, name: &str, config: &ManagerConfig) -> Result<Manager, RegistryError> {
        let monitor = self
            .build_monitor(&config.monitor)
            .map_err(|source| RegistryError::Monitor {
                manager: name.to_string(),
                backend: config.monitor.backend_name(),
                source,
            })?;
        let inventory = self
            .build_inventory(&config.inventory)
            .map_err(|source| RegistryError::Inventory {
                manager: name.to_string(),
                backend: config.inventory.backend_name(),
                source,
            })?;
        let strategy = self
            .build_strategy(&config.strategy, monitor, inventory.clone())
            .map_err(|source| RegistryError::Strategy {
                manager: name.to_string(),
                strategy: config.strategy.strategy_name(),
                source,
            })?;

        info!(
            manager = %name,
            monitor = config.monitor.backend_name(),
            inventory = config.inventory.backend_name(),
            strategy = config.strategy.strategy_name(),
            scale_up = config.scale_up,
            scale_down = config.scale_down,
            "Manager configured"
        );
        Ok(
            Manager::new(name, strategy, inventory, config.policy()).with_backends(Backends {
                inventory: config.inventory.backend_name(),
                monitor: config.monitor.backend_name(),
                strategy: config.strategy.strategy_name(),
            }),
        )
    }

    /// Build every manager in the document, stopping at the first bad one.
    pub fn build_all(&self, config: &AutoscalerConfig) -> Result<Vec<Manager>, RegistryError> {
        config
            .managers
            .iter()
            .map(|(name, manager)| self.build_manager(name, manager))
            .collect()
    }
}
