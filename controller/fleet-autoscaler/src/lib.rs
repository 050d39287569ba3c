//! Fleet Autoscaler - samples utilization metrics and resizes fleets to match
//!
//! Each configured manager ties together three capabilities:
//! a [`Monitor`] that reads current metric values, a [`Strategy`] that turns
//! them into a [`Recommendation`], and an [`Inventory`] that is scaled by one
//! unit when the recommendation asks for it. The [`Scheduler`] runs every
//! manager on a fixed interval.

pub mod config;
pub mod inventory;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod strategy;

pub use config::{Args, AutoscalerConfig, ManagerConfig};
pub use inventory::{Inventory, InventoryError, Status};
pub use manager::{Backends, CycleOutcome, Manager, ManagerError, ScalingPolicy};
pub use metrics::Metrics;
pub use monitor::{MetricUpdate, Monitor, MonitorError};
pub use registry::{ComponentRegistry, RegistryError};
pub use scheduler::{CycleReport, Scheduler};
pub use strategy::{Recommendation, Strategy, StrategyError};
