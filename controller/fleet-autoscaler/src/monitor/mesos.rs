//! Cluster utilization read from the Mesos master state.
//!
//! Readings are aggregated over every agent: cluster totals and
//! percentages (`mesos.cluster.*`) and per-agent extremes and averages
//! (`mesos.slave.*`).

use super::{check_response, MetricUpdate, Monitor, MonitorError};
use crate::config::duration;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct MesosConfig {
    /// Any master of the cluster. Non-leading masters redirect to the leader.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_timeout", deserialize_with = "duration::deserialize")]
    pub timeout: Duration,
}

fn default_url() -> String {
    "http://mesos.service.consul:5050".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

/// The subset of `/master/state` the monitor reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MasterState {
    #[serde(default)]
    pub slaves: Vec<AgentState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub unreserved_resources: Resources,
    #[serde(default)]
    pub used_resources: Resources,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cpus: f64,
    #[serde(default)]
    pub mem: f64,
}

#[async_trait]
pub trait MesosStateSource: Send + Sync {
    async fn master_state(&self) -> Result<MasterState, MonitorError>;
}

pub struct HttpMesosStateSource {
    client: reqwest::Client,
    state_url: String,
}

impl HttpMesosStateSource {
    pub fn new(config: &MesosConfig) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            state_url: format!("{}/master/state", config.url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl MesosStateSource for HttpMesosStateSource {
    async fn master_state(&self) -> Result<MasterState, MonitorError> {
        debug!(url = %self.state_url, "Fetching Mesos master state");
        let response = check_response(self.client.get(&self.state_url).send().await?).await?;
        response
            .json::<MasterState>()
            .await
            .map_err(|e| MonitorError::Decode(format!("Mesos master state: {}", e)))
    }
}

/// Aggregated readings keyed by metric name.
#[derive(Debug, Default)]
pub struct ClusterStats {
    metrics: BTreeMap<String, f64>,
    // Percentages whose resource has no capacity, with the reason.
    unmeasurable: BTreeMap<String, String>,
}

impl ClusterStats {
    pub fn from_state(state: &MasterState) -> Result<Self, MonitorError> {
        if state.slaves.is_empty() {
            return Err(MonitorError::Decode(
                "Mesos master state lists no agents".to_string(),
            ));
        }
        let mut stats = ClusterStats::default();

        for agent in &state.slaves {
            let total = agent.unreserved_resources;
            let used = agent.used_resources;

            stats.add("mesos.cluster.cpu_total", total.cpus);
            stats.add("mesos.cluster.cpu_used", used.cpus);
            stats.add("mesos.cluster.mem_total", total.mem);
            stats.add("mesos.cluster.mem_used", used.mem);

            stats.update_min_max("mesos.slave.cpu_free", total.cpus - used.cpus);
            stats.update_min_max("mesos.slave.cpu_used", used.cpus);
            stats.update_min_max("mesos.slave.mem_free", total.mem - used.mem);
            stats.update_min_max("mesos.slave.mem_used", used.mem);
            if total.cpus > 0.0 {
                stats.update_min_max("mesos.slave.cpu_percent", used.cpus * 100.0 / total.cpus);
            }
            if total.mem > 0.0 {
                stats.update_min_max("mesos.slave.mem_percent", used.mem * 100.0 / total.mem);
            }
        }
        let agents = state.slaves.len() as f64;

        for resource in ["cpu", "mem"] {
            let total = stats.value(&format!("mesos.cluster.{}_total", resource));
            let used = stats.value(&format!("mesos.cluster.{}_used", resource));

            stats.set(&format!("mesos.cluster.{}_free", resource), tenths(total - used));
            stats.set(&format!("mesos.slave.{}_free.avg", resource), (total - used) / agents);
            stats.set(&format!("mesos.slave.{}_used.avg", resource), used / agents);

            let percent = format!("mesos.cluster.{}_percent", resource);
            if total > 0.0 {
                stats.set(&percent, used * 100.0 / total);
            } else {
                stats.unmeasurable.insert(
                    percent,
                    format!(
                        "cluster reports no unreserved {} across {} agents",
                        resource,
                        state.slaves.len()
                    ),
                );
            }
        }

        Ok(stats)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Reading for one requested metric.
    pub fn reading(&self, name: &str) -> Result<MetricUpdate, MonitorError> {
        if let Some(reading) = self.get(name) {
            return Ok(MetricUpdate::new(name, reading));
        }
        match self.unmeasurable.get(name) {
            Some(reason) => Err(MonitorError::Decode(format!("{}: {}", name, reason))),
            None => Err(MonitorError::UnknownMetric(name.to_string())),
        }
    }

    fn value(&self, name: &str) -> f64 {
        self.get(name).unwrap_or_default()
    }

    fn set(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
    }

    // Mesos reports resources to one decimal place; summing in tenths keeps
    // totals such as 1.1 + 1.1 + 1.1 exact.
    fn add(&mut self, name: &str, value: f64) {
        let sum = self.value(name) + value;
        self.set(name, tenths(sum));
    }

    fn update_min_max(&mut self, name: &str, value: f64) {
        let min = format!("{}.min", name);
        let max = format!("{}.max", name);
        let current_min = self.get(&min).map_or(value, |m| m.min(value));
        let current_max = self.get(&max).map_or(value, |m| m.max(value));
        self.set(&min, current_min);
        self.set(&max, current_max);
    }

    fn log_usage(&self) {
        info!(
            cpu_used = self.value("mesos.cluster.cpu_used"),
            cpu_total = self.value("mesos.cluster.cpu_total"),
            cpu_percent = self.value("mesos.cluster.cpu_percent"),
            mem_used = self.value("mesos.cluster.mem_used"),
            mem_total = self.value("mesos.cluster.mem_total"),
            mem_percent = self.value("mesos.cluster.mem_percent"),
            "Mesos cluster usage"
        );
    }
}

fn tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub struct MesosMonitor {
    source: Box<dyn MesosStateSource>,
}

impl MesosMonitor {
    pub fn new(source: Box<dyn MesosStateSource>) -> Self {
        Self { source }
    }

    pub fn from_config(config: &MesosConfig) -> Result<Self, MonitorError> {
        Ok(Self::new(Box::new(HttpMesosStateSource::new(config)?)))
    }

    pub async fn stats(&self) -> Result<ClusterStats, MonitorError> {
        let state = self.source.master_state().await?;
        ClusterStats::from_state(&state)
    }
}

#[async_trait]
impl Monitor for MesosMonitor {
    async fn get_updated_metrics(
        &self,
        names: &[String],
    ) -> Result<Vec<MetricUpdate>, MonitorError> {
        let stats = self.stats().await?;
        stats.log_usage();

        names.iter().map(|name| stats.reading(name)).collect()
    }
}
