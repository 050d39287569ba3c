//! Threshold strategy: keep each metric inside a band.
//!
//! Below `min` the fleet is over-provisioned, above `max` it is
//! under-provisioned. Both bounds are inclusive of the hold band. With
//! `invert_scaling` a high reading means fewer resources are needed, which
//! suits metrics such as idle percentage.

use super::{aggregate, readings_by_name, Recommendation, Strategy, StrategyError};
use crate::monitor::Monitor;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdBounds>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ThresholdBounds {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub invert_scaling: bool,
}

impl ThresholdBounds {
    fn validate(&self, name: &str) -> Result<(), StrategyError> {
        if self.min.is_none() && self.max.is_none() {
            return Err(StrategyError::MissingThreshold {
                metric: name.to_string(),
            });
        }
        let finite = self.min.map_or(true, f64::is_finite) && self.max.map_or(true, f64::is_finite);
        let ordered = match (self.min, self.max) {
            (Some(min), Some(max)) => min <= max,
            _ => true,
        };
        if !finite || !ordered {
            return Err(StrategyError::InvalidThreshold {
                metric: name.to_string(),
            });
        }
        Ok(())
    }

    /// A missing bound never triggers.
    pub fn recommend(&self, reading: f64) -> Recommendation {
        let recommendation = if self.min.is_some_and(|min| reading < min) {
            Recommendation::ScaleDown
        } else if self.max.is_some_and(|max| reading > max) {
            Recommendation::ScaleUp
        } else {
            Recommendation::Hold
        };

        if self.invert_scaling {
            recommendation.inverted()
        } else {
            recommendation
        }
    }
}

pub struct ThresholdStrategy {
    thresholds: BTreeMap<String, ThresholdBounds>,
    metric_names: Vec<String>,
    monitor: Arc<dyn Monitor>,
}

impl ThresholdStrategy {
    pub fn new(config: &ThresholdConfig, monitor: Arc<dyn Monitor>) -> Result<Self, StrategyError> {
        if config.thresholds.is_empty() {
            return Err(StrategyError::NoMetrics);
        }
        for (name, bounds) in &config.thresholds {
            bounds.validate(name)?;
        }

        Ok(Self {
            metric_names: config.thresholds.keys().cloned().collect(),
            thresholds: config.thresholds.clone(),
            monitor,
        })
    }
}

#[async_trait]
impl Strategy for ThresholdStrategy {
    async fn evaluate(&self) -> Result<Recommendation, StrategyError> {
        let updates = self.monitor.get_updated_metrics(&self.metric_names).await?;
        let readings = readings_by_name(&self.metric_names, updates)?;

        let outcome = aggregate(self.thresholds.iter().map(|(name, bounds)| {
            let reading = readings[name];
            let recommendation = bounds.recommend(reading);
            debug!(
                metric = %name,
                reading,
                min = ?bounds.min,
                max = ?bounds.max,
                inverted = bounds.invert_scaling,
                recommendation = %recommendation,
                "Threshold evaluated"
            );
            recommendation
        }));

        info!(recommendation = %outcome, "Threshold strategy recommendation");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{FakeMonitor, FakeMonitorConfig, MetricUpdate, MonitorError};
    use Recommendation::*;

    fn bounds(min: Option<f64>, max: Option<f64>, invert_scaling: bool) -> ThresholdBounds {
        ThresholdBounds {
            min,
            max,
            invert_scaling,
        }
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let band = bounds(Some(5.0), Some(15.0), false);
        assert_eq!(band.recommend(5.0), Hold);
        assert_eq!(band.recommend(15.0), Hold);
        assert_eq!(band.recommend(4.0), ScaleDown);
        assert_eq!(band.recommend(16.0), ScaleUp);
    }

    #[test]
    fn test_inversion_swaps_outside_the_band_only() {
        let plain = bounds(Some(5.0), Some(15.0), false);
        let inverted = bounds(Some(5.0), Some(15.0), true);
        for reading in [0.0, 4.9, 5.0, 10.0, 15.0, 15.1, 40.0] {
            assert_eq!(inverted.recommend(reading), plain.recommend(reading).inverted());
        }
        assert_eq!(inverted.recommend(10.0), Hold);
    }

    #[test]
    fn test_one_sided_bounds() {
        assert_eq!(bounds(None, Some(80.0), false).recommend(-1000.0), Hold);
        assert_eq!(bounds(None, Some(80.0), false).recommend(81.0), ScaleUp);
        assert_eq!(bounds(Some(20.0), None, false).recommend(1e9), Hold);
        assert_eq!(bounds(Some(20.0), None, false).recommend(19.0), ScaleDown);
    }

    #[test]
    fn test_config_validation() {
        let monitor: Arc<dyn Monitor> = Arc::new(FakeMonitor::new(&FakeMonitorConfig::default()));
        let config = |b: ThresholdBounds| ThresholdConfig {
            thresholds: BTreeMap::from([("load".to_string(), b)]),
        };

        assert!(matches!(
            ThresholdStrategy::new(&config(bounds(None, None, true)), monitor.clone()),
            Err(StrategyError::MissingThreshold { ref metric }) if metric == "load"
        ));
        assert!(matches!(
            ThresholdStrategy::new(&config(bounds(Some(9.0), Some(1.0), false)), monitor.clone()),
            Err(StrategyError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            ThresholdStrategy::new(
                &ThresholdConfig {
                    thresholds: BTreeMap::new()
                },
                monitor
            ),
            Err(StrategyError::NoMetrics)
        ));
    }

    struct FixedReadings(Vec<(&'static str, f64)>);

    #[async_trait]
    impl Monitor for FixedReadings {
        async fn get_updated_metrics(
            &self,
            _names: &[String],
        ) -> Result<Vec<MetricUpdate>, MonitorError> {
            Ok(self
                .0
                .iter()
                .map(|(name, reading)| MetricUpdate::new(*name, *reading))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_worst_case_across_metrics() {
        let config = ThresholdConfig {
            thresholds: BTreeMap::from([
                ("cpu".to_string(), bounds(Some(20.0), Some(80.0), false)),
                ("idle".to_string(), bounds(Some(10.0), Some(50.0), true)),
            ]),
        };
        // cpu is low (scale down); idle is low, inverted to scale up.
        let strategy = ThresholdStrategy::new(
            &config,
            Arc::new(FixedReadings(vec![("cpu", 5.0), ("idle", 2.0)])),
        )
        .unwrap();
        assert_eq!(strategy.evaluate().await.unwrap(), ScaleUp);
    }

    #[tokio::test]
    async fn test_monitor_failure_propagates() {
        struct Broken;

        #[async_trait]
        impl Monitor for Broken {
            async fn get_updated_metrics(
                &self,
                names: &[String],
            ) -> Result<Vec<MetricUpdate>, MonitorError> {
                Err(MonitorError::UnknownMetric(names[0].clone()))
            }
        }

        let config = ThresholdConfig {
            thresholds: BTreeMap::from([("cpu".to_string(), bounds(Some(1.0), None, false))]),
        };
        let strategy = ThresholdStrategy::new(&config, Arc::new(Broken)).unwrap();
        assert!(matches!(
            strategy.evaluate().await,
            Err(StrategyError::Monitor(MonitorError::UnknownMetric(_)))
        ));
    }
}
