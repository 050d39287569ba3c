//! Monitors supply current readings for named metrics.
//!
//! A monitor either answers for every requested name or fails the whole
//! call. Strategies never compute on a partial metric set.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub mod datadog;
pub mod fake;
pub mod mesos;
pub mod newrelic;

pub use datadog::{DatadogConfig, DatadogMonitor};
pub use fake::{FakeMonitor, FakeMonitorConfig};
pub use mesos::{HttpMesosStateSource, MesosConfig, MesosMonitor, MesosStateSource};
pub use newrelic::{NewRelicConfig, NewRelicMonitor};

/// A reading for one requested metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricUpdate {
    pub name: String,
    pub current_reading: f64,
}

impl MetricUpdate {
    pub fn new(name: impl Into<String>, current_reading: f64) -> Self {
        Self {
            name: name.into(),
            current_reading,
        }
    }
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("metrics request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metrics API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("metrics API key invalid")]
    InvalidApiKey,

    #[error("No data for {metric} between {from} and {to}")]
    NoData {
        metric: String,
        from: String,
        to: String,
    },

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("no query configured for metric {0}")]
    MissingQuery(String),

    #[error("unreadable metrics response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Monitor: Send + Sync {
    /// Return exactly one update per requested name, in any order.
    async fn get_updated_metrics(&self, names: &[String])
        -> Result<Vec<MetricUpdate>, MonitorError>;
}

/// Monitor backend selected by the `name` key of a manager's `monitor` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum MonitorConfig {
    Fake(FakeMonitorConfig),
    Mesos(MesosConfig),
    Datadog(DatadogConfig),
    #[serde(rename = "newrelic")]
    NewRelic(NewRelicConfig),
}

impl MonitorConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            MonitorConfig::Fake(_) => "fake",
            MonitorConfig::Mesos(_) => "mesos",
            MonitorConfig::Datadog(_) => "datadog",
            MonitorConfig::NewRelic(_) => "newrelic",
        }
    }
}

/// Turn a non-success HTTP response into [`MonitorError::Api`].
pub(crate) async fn check_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, MonitorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unable to read body>".to_string());
    Err(MonitorError::Api {
        status: status.as_u16(),
        body,
    })
}
