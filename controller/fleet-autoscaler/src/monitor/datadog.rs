//! Datadog time-series monitor.
//!
//! Each metric name maps to a Datadog query in configuration. A reading is
//! the most recent point of the single series the query returns over the
//! configured look-back window.

use super::{check_response, MetricUpdate, Monitor, MonitorError};
use crate::config::duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct DatadogConfig {
    pub api_key: String,
    pub app_key: String,

    /// Look-back window for every query
    #[serde(deserialize_with = "duration::deserialize")]
    pub time_period: Duration,

    #[serde(default)]
    pub metrics: BTreeMap<String, DatadogMetric>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout", deserialize_with = "duration::deserialize")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatadogMetric {
    pub query: String,
}

fn default_base_url() -> String {
    "https://api.datadoghq.com".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    #[serde(default)]
    valid: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    series: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    pointlist: Vec<(f64, Option<f64>)>,
}

pub struct DatadogMonitor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    app_key: String,
    time_period: Duration,
    queries: BTreeMap<String, String>,
    api_key_valid: OnceCell<bool>,
}

impl DatadogMonitor {
    pub fn new(config: &DatadogConfig) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            app_key: config.app_key.clone(),
            time_period: config.time_period,
            queries: config
                .metrics
                .iter()
                .map(|(name, metric)| (name.clone(), metric.query.clone()))
                .collect(),
            api_key_valid: OnceCell::new(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("DD-API-KEY", &self.api_key)
            .header("DD-APPLICATION-KEY", &self.app_key)
    }

    async fn validate_api_key(&self) -> Result<bool, MonitorError> {
        let response = self.get("/api/v1/validate").send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            _ => {
                let body: ValidateResponse = check_response(response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| MonitorError::Decode(format!("Datadog validate response: {}", e)))?;
                Ok(body.valid)
            }
        }
    }

    /// The validation answer is kept for the life of the monitor; transport
    /// failures are not.
    async fn ensure_api_key_valid(&self) -> Result<(), MonitorError> {
        let valid = self
            .api_key_valid
            .get_or_try_init(|| self.validate_api_key())
            .await?;

        if *valid {
            Ok(())
        } else {
            warn!("Datadog API key invalid");
            Err(MonitorError::InvalidApiKey)
        }
    }

    async fn query_last_point(
        &self,
        metric: &str,
        query: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<f64, MonitorError> {
        debug!(
            metric,
            query,
            from = from.timestamp(),
            to = to.timestamp(),
            "Querying Datadog"
        );
        let response = self
            .get("/api/v1/query")
            .query(&[
                ("from", from.timestamp().to_string()),
                ("to", to.timestamp().to_string()),
                ("query", query.to_string()),
            ])
            .send()
            .await?;
        let body: QueryResponse = check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| MonitorError::Decode(format!("Datadog query response: {}", e)))?;
        debug!(metric, series = body.series.len(), "Datadog query returned");

        let no_data = || MonitorError::NoData {
            metric: metric.to_string(),
            from: from.to_rfc3339(),
            to: to.to_rfc3339(),
        };

        match body.series.as_slice() {
            [series] => series
                .pointlist
                .iter()
                .rev()
                .find_map(|(_, value)| *value)
                .ok_or_else(no_data),
            _ => Err(no_data()),
        }
    }
}

#[async_trait]
impl Monitor for DatadogMonitor {
    async fn get_updated_metrics(
        &self,
        names: &[String],
    ) -> Result<Vec<MetricUpdate>, MonitorError> {
        let queries = names
            .iter()
            .map(|name| {
                self.queries
                    .get(name)
                    .map(|query| (name, query))
                    .ok_or_else(|| MonitorError::MissingQuery(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.ensure_api_key_valid().await?;

        let now = SystemTime::now();
        let to = DateTime::<Utc>::from(now);
        let from = DateTime::<Utc>::from(now.checked_sub(self.time_period).unwrap_or(UNIX_EPOCH));

        let mut updates = Vec::with_capacity(queries.len());
        for (name, query) in queries {
            let reading = self.query_last_point(name, query, from, to).await?;
            updates.push(MetricUpdate::new(name.clone(), reading));
        }
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(metrics: &[(&str, &str)]) -> DatadogConfig {
        DatadogConfig {
            api_key: "api".to_string(),
            app_key: "app".to_string(),
            time_period: Duration::from_secs(300),
            metrics: metrics
                .iter()
                .map(|(name, query)| {
                    (
                        name.to_string(),
                        DatadogMetric {
                            query: query.to_string(),
                        },
                    )
                })
                .collect(),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_missing_query_fails_before_any_request() {
        let monitor = DatadogMonitor::new(&config(&[("cpu", "avg:system.cpu.user{*}")])).unwrap();
        let names = vec!["cpu".to_string(), "queue".to_string()];

        let err = monitor.get_updated_metrics(&names).await.unwrap_err();
        assert!(matches!(err, MonitorError::MissingQuery(ref name) if name == "queue"));
    }

    #[test]
    fn test_series_point_shape() {
        let body: QueryResponse = serde_json::from_str(
            r#"{"status":"ok","series":[{"metric":"system.cpu.user","pointlist":[[1700000000000.0, 12.5],[1700000060000.0, null]]}]}"#,
        )
        .unwrap();
        assert_eq!(body.series.len(), 1);
        assert_eq!(body.series[0].pointlist[0], (1700000000000.0, Some(12.5)));
        assert_eq!(body.series[0].pointlist[1].1, None);
    }
}
