//! Strategies turn metric readings into a single scaling recommendation.
//!
//! Every strategy judges each configured metric on its own and then keeps
//! the outcome furthest towards scaling up, so one metric under pressure is
//! enough to prevent a scale-down.

use crate::inventory::InventoryError;
use crate::monitor::{MetricUpdate, MonitorError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

pub mod ratio;
pub mod threshold;

pub use ratio::{RatioConfig, RatioPair, RatioStrategy};
pub use threshold::{ThresholdBounds, ThresholdConfig, ThresholdStrategy};

/// Ordered so that `max` picks the more conservative outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    ScaleDown = -1,
    Hold = 0,
    ScaleUp = 1,
}

impl Recommendation {
    /// Swap scale up and scale down; hold stays hold.
    pub fn inverted(self) -> Self {
        match self {
            Recommendation::ScaleDown => Recommendation::ScaleUp,
            Recommendation::Hold => Recommendation::Hold,
            Recommendation::ScaleUp => Recommendation::ScaleDown,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::ScaleDown => write!(f, "scale down"),
            Recommendation::Hold => write!(f, "hold"),
            Recommendation::ScaleUp => write!(f, "scale up"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("ratio for metric {metric} needs both `metric` and `inventory` units")]
    MissingRatio { metric: String },

    #[error("ratio for metric {metric} must use positive, finite units")]
    InvalidRatio { metric: String },

    #[error("threshold for metric {metric} needs at least one of `min` or `max`")]
    MissingThreshold { metric: String },

    #[error("threshold for metric {metric} has min above max or a non-finite bound")]
    InvalidThreshold { metric: String },

    #[error("strategy has no metrics configured")]
    NoMetrics,

    #[error("monitor returned no reading for metric {metric}")]
    MissingReading { metric: String },

    #[error("monitor returned an unrequested or duplicate reading for metric {metric}")]
    UnexpectedReading { metric: String },
}

impl StrategyError {
    /// Configuration problems that are caught when the strategy is built.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            StrategyError::MissingRatio { .. }
                | StrategyError::InvalidRatio { .. }
                | StrategyError::MissingThreshold { .. }
                | StrategyError::InvalidThreshold { .. }
                | StrategyError::NoMetrics
        )
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    async fn evaluate(&self) -> Result<Recommendation, StrategyError>;
}

/// Strategy selected by the `name` key of a manager's `strategy` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum StrategyConfig {
    Ratio(RatioConfig),
    Threshold(ThresholdConfig),
}

impl StrategyConfig {
    pub fn strategy_name(&self) -> &'static str {
        match self {
            StrategyConfig::Ratio(_) => "ratio",
            StrategyConfig::Threshold(_) => "threshold",
        }
    }
}

/// Worst case wins. An empty set holds.
pub fn aggregate<I>(recommendations: I) -> Recommendation
where
    I: IntoIterator<Item = Recommendation>,
{
    recommendations
        .into_iter()
        .max()
        .unwrap_or(Recommendation::Hold)
}

/// Index the monitor's answer by name, insisting it covers exactly `expected`.
pub(crate) fn readings_by_name(
    expected: &[String],
    updates: Vec<MetricUpdate>,
) -> Result<BTreeMap<String, f64>, StrategyError> {
    let wanted: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
    let mut readings = BTreeMap::new();

    for update in updates {
        if !wanted.contains(update.name.as_str()) || readings.contains_key(&update.name) {
            return Err(StrategyError::UnexpectedReading {
                metric: update.name,
            });
        }
        readings.insert(update.name, update.current_reading);
    }

    if let Some(missing) = expected.iter().find(|name| !readings.contains_key(*name)) {
        return Err(StrategyError::MissingReading {
            metric: missing.clone(),
        });
    }
    Ok(readings)
}
