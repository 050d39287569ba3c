//! Per-manager cycle counters.
//!
//! Counters live for the process and are reported as a structured log line
//! after each scheduler cycle.

use crate::manager::{CycleOutcome, ManagerError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Counters {
    evaluations: AtomicU64,
    scale_ups: AtomicU64,
    scale_downs: AtomicU64,
    advisory: AtomicU64,
    refused: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            scale_ups: self.scale_ups.load(Ordering::Relaxed),
            scale_downs: self.scale_downs.load(Ordering::Relaxed),
            advisory: self.advisory.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of one manager's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub evaluations: u64,
    pub scale_ups: u64,
    pub scale_downs: u64,
    pub advisory: u64,
    pub refused: u64,
    pub errors: u64,
}

/// Cycle counters keyed by manager name.
///
/// The set of managers is fixed at construction so recording never locks.
#[derive(Debug, Default)]
pub struct Metrics {
    managers: BTreeMap<String, Counters>,
}

impl Metrics {
    pub fn new<I, S>(manager_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            managers: manager_names
                .into_iter()
                .map(|name| (name.into(), Counters::default()))
                .collect(),
        }
    }

    /// Count one finished cycle.
    pub fn record(&self, manager: &str, result: &Result<CycleOutcome, ManagerError>) {
        let Some(counters) = self.managers.get(manager) else {
            warn!(manager = %manager, "Dropping cycle result for unregistered manager");
            return;
        };

        counters.evaluations.fetch_add(1, Ordering::Relaxed);
        let counter = match result {
            Ok(CycleOutcome::Held) => return,
            Ok(CycleOutcome::ScaledUp) => &counters.scale_ups,
            Ok(CycleOutcome::ScaledDown) => &counters.scale_downs,
            Ok(CycleOutcome::WouldScaleUp | CycleOutcome::WouldScaleDown) => &counters.advisory,
            Ok(CycleOutcome::ScaleUpRefused(_) | CycleOutcome::ScaleDownRefused(_)) => {
                &counters.refused
            }
            Err(_) => &counters.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self, manager: &str) -> Option<CounterSnapshot> {
        self.managers.get(manager).map(Counters::snapshot)
    }

    pub fn snapshot(&self) -> BTreeMap<String, CounterSnapshot> {
        self.managers
            .iter()
            .map(|(name, counters)| (name.clone(), counters.snapshot()))
            .collect()
    }

    pub fn log_summary(&self) {
        for (manager, counters) in self.snapshot() {
            info!(
                manager = %manager,
                evaluations = counters.evaluations,
                scale_ups = counters.scale_ups,
                scale_downs = counters.scale_downs,
                advisory = counters.advisory,
                refused = counters.refused,
                errors = counters.errors,
                "Cycle counters"
            );
        }
    }
}
