//! New Relic APM application summary monitor.

use super::{check_response, MetricUpdate, Monitor, MonitorError};
use crate::config::duration;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct NewRelicConfig {
    pub api_key: String,
    pub app_id: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout", deserialize_with = "duration::deserialize")]
    pub timeout: Duration,
}

fn default_base_url() -> String {
    "https://api.newrelic.com".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Deserialize)]
struct ApplicationResponse {
    application: Application,
}

#[derive(Debug, Deserialize)]
struct Application {
    application_summary: ApplicationSummary,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApplicationSummary {
    #[serde(default)]
    pub response_time: f64,
    #[serde(default)]
    pub throughput: f64,
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub apdex_score: f64,
}

impl ApplicationSummary {
    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "response_time" => Some(self.response_time),
            "throughput" => Some(self.throughput),
            "error_rate" => Some(self.error_rate),
            "apdex_score" => Some(self.apdex_score),
            _ => None,
        }
    }
}

pub struct NewRelicMonitor {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl NewRelicMonitor {
    pub fn new(config: &NewRelicConfig) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/v2/applications/{}.json",
                config.base_url.trim_end_matches('/'),
                config.app_id
            ),
            api_key: config.api_key.clone(),
        })
    }

    async fn summary(&self) -> Result<ApplicationSummary, MonitorError> {
        debug!(endpoint = %self.endpoint, "Fetching New Relic application summary");
        let response = self
            .client
            .get(&self.endpoint)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;
        let body: ApplicationResponse = check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| MonitorError::Decode(format!("New Relic application: {}", e)))?;
        Ok(body.application.application_summary)
    }
}

#[async_trait]
impl Monitor for NewRelicMonitor {
    async fn get_updated_metrics(
        &self,
        names: &[String],
    ) -> Result<Vec<MetricUpdate>, MonitorError> {
        if let Some(unknown) = names
            .iter()
            .find(|name| ApplicationSummary::default().metric(name).is_none())
        {
            return Err(MonitorError::UnknownMetric(unknown.clone()));
        }

        let summary = self.summary().await?;
        Ok(names
            .iter()
            .filter_map(|name| {
                summary
                    .metric(name)
                    .map(|reading| MetricUpdate::new(name.clone(), reading))
            })
            .collect())
    }
}
