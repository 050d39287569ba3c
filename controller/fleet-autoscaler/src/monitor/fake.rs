//! Synthetic monitor producing a sine wave between 0 and 100.
//!
//! Useful for exercising a manager against demand that rises and falls
//! gradually without any real telemetry.

use super::{MetricUpdate, Monitor, MonitorError};
use async_trait::async_trait;
use serde::Deserialize;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct FakeMonitorConfig {
    /// Degrees the wave advances per call
    #[serde(default = "default_increments")]
    pub increments: u32,
}

fn default_increments() -> u32 {
    10
}

impl Default for FakeMonitorConfig {
    fn default() -> Self {
        Self {
            increments: default_increments(),
        }
    }
}

pub struct FakeMonitor {
    increments: u32,
    iteration: AtomicU64,
}

impl FakeMonitor {
    pub fn new(config: &FakeMonitorConfig) -> Self {
        Self {
            increments: config.increments,
            iteration: AtomicU64::new(0),
        }
    }

    fn next_reading(&self) -> f64 {
        let iteration = self.iteration.fetch_add(1, Ordering::Relaxed);
        let degrees = iteration as f64 * f64::from(self.increments);
        (((degrees * PI / 180.0).sin() + 1.0) * 50.0).trunc()
    }
}

#[async_trait]
impl Monitor for FakeMonitor {
    async fn get_updated_metrics(
        &self,
        names: &[String],
    ) -> Result<Vec<MetricUpdate>, MonitorError> {
        let reading = self.next_reading();
        info!(reading, "Setting all metrics to the fake reading");
        Ok(names
            .iter()
            .map(|name| MetricUpdate::new(name.clone(), reading))
            .collect())
    }
}
