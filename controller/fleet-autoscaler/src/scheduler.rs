//! Fixed-interval loop over all managers.

use crate::manager::{CycleOutcome, Manager, ManagerError};
use crate::metrics::Metrics;
use futures_util::future::join_all;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, info_span, Instrument};

/// What one manager did during a scheduler cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub manager: String,
    pub result: Result<CycleOutcome, ManagerError>,
}

pub struct Scheduler {
    managers: Vec<Manager>,
    interval: Duration,
    metrics: Metrics,
}

impl Scheduler {
    pub fn new(managers: Vec<Manager>, interval: Duration) -> Self {
        let metrics = Metrics::new(managers.iter().map(|m| m.name().to_string()));
        Self {
            managers,
            interval,
            metrics,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run every manager once, concurrently, and wait for all of them.
    pub async fn run_cycle(&self) -> Vec<CycleReport> {
        let cycles = self.managers.iter().map(|manager| {
            let span = info_span!("manager", manager = %manager.name());
            async move {
                let result = manager.run().await;
                match &result {
                    Ok(outcome) => info!(outcome = %outcome, "Cycle complete"),
                    Err(e) => error!(error = %e, "Cycle failed"),
                }
                CycleReport {
                    manager: manager.name().to_string(),
                    result,
                }
            }
            .instrument(span)
        });

        let reports = join_all(cycles).await;
        for report in &reports {
            self.metrics.record(&report.manager, &report.result);
        }
        self.metrics.log_summary();
        reports
    }

    /// Cycle until `shutdown` turns true or its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            managers = self.managers.len(),
            interval = %humantime::format_duration(self.interval),
            "Scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::FakeInventory;
    use crate::manager::ScalingPolicy;
    use crate::strategy::{Recommendation, Strategy, StrategyError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct Counting {
        calls: Arc<AtomicU64>,
        recommendation: Recommendation,
    }

    #[async_trait]
    impl Strategy for Counting {
        async fn evaluate(&self) -> Result<Recommendation, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.recommendation)
        }
    }

    struct Failing;

    #[async_trait]
    impl Strategy for Failing {
        async fn evaluate(&self) -> Result<Recommendation, StrategyError> {
            Err(StrategyError::MissingReading {
                metric: "cpu".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_cycle_runs_every_manager_despite_errors() {
        let calls = Arc::new(AtomicU64::new(0));
        let inventory = Arc::new(FakeInventory::with_size(2));
        let managers = vec![
            Manager::new("broken", Arc::new(Failing), inventory.clone(), ScalingPolicy::default()),
            Manager::new(
                "web",
                Arc::new(Counting {
                    calls: calls.clone(),
                    recommendation: Recommendation::ScaleUp,
                }),
                inventory.clone(),
                ScalingPolicy::default(),
            ),
        ];
        let scheduler = Scheduler::new(managers, Duration::from_secs(60));

        let reports = scheduler.run_cycle().await;
        assert_eq!(reports.len(), 2);
        assert!(reports[0].result.is_err());
        assert_eq!(reports[1].result.as_ref().unwrap(), &CycleOutcome::ScaledUp);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(inventory.size(), 3);
        assert_eq!(scheduler.metrics().counters("broken").unwrap().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_repeats_until_shutdown() {
        let calls = Arc::new(AtomicU64::new(0));
        let managers = vec![Manager::new(
            "web",
            Arc::new(Counting {
                calls: calls.clone(),
                recommendation: Recommendation::Hold,
            }),
            Arc::new(FakeInventory::with_size(1)),
            ScalingPolicy::default(),
        )];
        let scheduler = Arc::new(Scheduler::new(managers, Duration::from_secs(120)));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(rx).await }
        });

        tokio::time::sleep(Duration::from_secs(250)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.metrics().counters("web").unwrap().evaluations, 3);
    }
}
