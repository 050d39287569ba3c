//! Ratio strategy: keep the fleet proportional to a metric.
//!
//! A pair `(metric, inventory)` reads "every `metric` units of load need
//! `inventory` units of fleet". The ideal size for reading `c` is
//! `ceil(c * inventory / metric)`, rounding towards more capacity.

use super::{aggregate, readings_by_name, Recommendation, Strategy, StrategyError};
use crate::inventory::Inventory;
use crate::monitor::Monitor;
use async_trait::async_trait;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct RatioConfig {
    #[serde(default)]
    pub ratios: BTreeMap<String, RatioPair>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RatioPair {
    #[serde(default)]
    pub metric: Option<f64>,
    #[serde(default)]
    pub inventory: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ratio {
    metric_units: f64,
    inventory_units: f64,
}

impl Ratio {
    fn from_pair(name: &str, pair: &RatioPair) -> Result<Self, StrategyError> {
        let (Some(metric_units), Some(inventory_units)) = (pair.metric, pair.inventory) else {
            return Err(StrategyError::MissingRatio {
                metric: name.to_string(),
            });
        };
        let valid = |units: f64| units.is_finite() && units > 0.0;
        if !valid(metric_units) || !valid(inventory_units) {
            return Err(StrategyError::InvalidRatio {
                metric: name.to_string(),
            });
        }
        Ok(Self {
            metric_units,
            inventory_units,
        })
    }
}

/// Ideal fleet size for `reading`.
pub fn target_size(reading: f64, metric_units: f64, inventory_units: f64) -> i64 {
    (reading * inventory_units / metric_units).ceil() as i64
}

/// Compare the current fleet size with the ideal one.
pub fn recommend(current: i64, target: i64) -> Recommendation {
    match current.cmp(&target) {
        Ordering::Less => Recommendation::ScaleUp,
        Ordering::Equal => Recommendation::Hold,
        Ordering::Greater => Recommendation::ScaleDown,
    }
}

pub struct RatioStrategy {
    ratios: BTreeMap<String, Ratio>,
    metric_names: Vec<String>,
    monitor: Arc<dyn Monitor>,
    inventory: Arc<dyn Inventory>,
}

impl RatioStrategy {
    pub fn new(
        config: &RatioConfig,
        monitor: Arc<dyn Monitor>,
        inventory: Arc<dyn Inventory>,
    ) -> Result<Self, StrategyError> {
        if config.ratios.is_empty() {
            return Err(StrategyError::NoMetrics);
        }
        let ratios = config
            .ratios
            .iter()
            .map(|(name, pair)| Ok((name.clone(), Ratio::from_pair(name, pair)?)))
            .collect::<Result<BTreeMap<_, _>, StrategyError>>()?;

        Ok(Self {
            metric_names: ratios.keys().cloned().collect(),
            ratios,
            monitor,
            inventory,
        })
    }
}

#[async_trait]
impl Strategy for RatioStrategy {
    async fn evaluate(&self) -> Result<Recommendation, StrategyError> {
        let updates = self.monitor.get_updated_metrics(&self.metric_names).await?;
        let readings = readings_by_name(&self.metric_names, updates)?;
        let current = self.inventory.total().await?;

        let outcome = aggregate(self.ratios.iter().map(|(name, ratio)| {
            let reading = readings[name];
            let target = target_size(reading, ratio.metric_units, ratio.inventory_units);
            let recommendation = recommend(current, target);
            debug!(
                metric = %name,
                reading,
                target,
                current,
                recommendation = %recommendation,
                "Ratio evaluated"
            );
            recommendation
        }));

        info!(current, recommendation = %outcome, "Ratio strategy recommendation");
        Ok(outcome)
    }
}
