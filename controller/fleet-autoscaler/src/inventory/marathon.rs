//! Marathon application instances as a fleet.

use super::{ensure_ready, CapacityBounds, Inventory, InventoryError, SettleDown, Status};
use crate::config::duration;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct MarathonConfig {
    /// Marathon base URL, e.g. `http://marathon.service.consul:8080`
    pub url: String,

    /// Application id, with or without the leading slash
    pub app: String,

    #[serde(default)]
    pub minimum_instances: Option<i64>,

    #[serde(default)]
    pub maximum_instances: Option<i64>,

    #[serde(default, deserialize_with = "duration::deserialize")]
    pub settle_down_period: Duration,

    #[serde(default = "default_timeout", deserialize_with = "duration::deserialize")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Deserialize)]
struct AppResponse {
    app: Application,
}

#[derive(Debug, Deserialize)]
struct Application {
    id: String,
    instances: i64,
    #[serde(default)]
    deployments: Vec<Deployment>,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    id: String,
}

#[derive(Debug, Serialize)]
struct ScaleRequest {
    instances: i64,
}

pub struct MarathonInventory {
    client: reqwest::Client,
    app_url: String,
    bounds: CapacityBounds,
    settle: SettleDown,
}

impl MarathonInventory {
    pub fn new(config: &MarathonConfig) -> Result<Self, InventoryError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            app_url: format!(
                "{}/v2/apps/{}",
                config.url.trim_end_matches('/'),
                config.app.trim_start_matches('/')
            ),
            bounds: CapacityBounds::new(config.minimum_instances, config.maximum_instances),
            settle: SettleDown::new(config.settle_down_period),
        })
    }

    async fn application(&self) -> Result<Application, InventoryError> {
        let response = self.client.get(&self.app_url).send().await?;
        match response.status() {
            status if status.is_success() => {
                let body: AppResponse = response.json().await?;
                Ok(body.app)
            }
            StatusCode::NOT_FOUND => Err(InventoryError::ApplicationNotFound(self.app_url.clone())),
            status => Err(backend_error(status, response).await),
        }
    }

    fn status_of(&self, app: &Application) -> Status {
        if !app.deployments.is_empty() {
            debug!(
                app = %app.id,
                deployments = ?app.deployments.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
                "Application has deployments in progress"
            );
            return Status::Updating;
        }
        if self.settle.is_settling() {
            debug!(app = %app.id, "Still within settle down period");
            return Status::Updating;
        }
        Status::Ok
    }
}

async fn backend_error(status: StatusCode, response: reqwest::Response) -> InventoryError {
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unable to read body>".to_string());
    InventoryError::Backend(format!("Marathon returned {}: {}", status, body))
}

#[async_trait]
impl Inventory for MarathonInventory {
    async fn total(&self) -> Result<i64, InventoryError> {
        Ok(self.application().await?.instances)
    }

    async fn status(&self) -> Result<Status, InventoryError> {
        let app = self.application().await?;
        Ok(self.status_of(&app))
    }

    async fn scale(&self, amount: i64) -> Result<(), InventoryError> {
        let app = self.application().await?;
        ensure_ready(self.status_of(&app))?;

        let instances = app.instances + amount;
        self.bounds.check(instances)?;

        let response = self
            .client
            .put(&self.app_url)
            .query(&[("force", "false")])
            .json(&ScaleRequest { instances })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status(), response).await);
        }
        self.settle.record_modification();

        info!(app = %app.id, amount, instances, "Scaling Marathon application");
        Ok(())
    }
}
