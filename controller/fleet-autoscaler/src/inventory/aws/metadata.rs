//! EC2 instance metadata service (IMDSv2).

use super::sigv4::Credentials;
use crate::inventory::InventoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const TOKEN_TTL_SECONDS: &str = "21600";

#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    /// Id of the instance this process runs on.
    async fn instance_id(&self) -> Result<String, InventoryError>;

    /// Temporary credentials of the instance profile role.
    async fn role_credentials(&self) -> Result<RoleCredentials, InventoryError>;
}

/// Instance role credentials and the moment they stop being valid.
#[derive(Debug, Clone)]
pub struct RoleCredentials {
    pub credentials: Credentials,
    pub expiration: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoleCredentialsDocument {
    code: String,
    access_key_id: String,
    secret_access_key: String,
    token: String,
    expiration: DateTime<Utc>,
}

pub struct ImdsClient {
    client: reqwest::Client,
    base_url: String,
}

impl ImdsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InventoryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn session_token(&self) -> Result<String, InventoryError> {
        let response = self
            .client
            .put(format!("{}/latest/api/token", self.base_url))
            .header("X-aws-ec2-metadata-token-ttl-seconds", TOKEN_TTL_SECONDS)
            .send()
            .await
            .map_err(|e| InventoryError::Metadata(format!("token request failed: {}", e)))?;
        read_text(response, "api/token").await
    }

    async fn get(&self, path: &str) -> Result<String, InventoryError> {
        let token = self.session_token().await?;
        debug!(path, "Reading instance metadata");
        let response = self
            .client
            .get(format!("{}/latest/meta-data/{}", self.base_url, path))
            .header("X-aws-ec2-metadata-token", token)
            .send()
            .await
            .map_err(|e| InventoryError::Metadata(format!("{} request failed: {}", path, e)))?;
        read_text(response, path).await
    }
}

async fn read_text(response: reqwest::Response, path: &str) -> Result<String, InventoryError> {
    let status = response.status();
    if !status.is_success() {
        return Err(InventoryError::Metadata(format!(
            "{} returned {}",
            path, status
        )));
    }
    let text = response
        .text()
        .await
        .map_err(|e| InventoryError::Metadata(format!("{}: {}", path, e)))?;
    Ok(text.trim().to_string())
}

#[async_trait]
impl InstanceMetadata for ImdsClient {
    async fn instance_id(&self) -> Result<String, InventoryError> {
        self.get("instance-id").await
    }

    async fn role_credentials(&self) -> Result<RoleCredentials, InventoryError> {
        let roles = self.get("iam/security-credentials/").await?;
        let role = roles
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| {
                InventoryError::Metadata("no instance profile role attached".to_string())
            })?
            .to_string();

        let document = self
            .get(&format!("iam/security-credentials/{}", role))
            .await?;
        let document: RoleCredentialsDocument = serde_json::from_str(&document)
            .map_err(|e| InventoryError::Metadata(format!("role credentials: {}", e)))?;
        if document.code != "Success" {
            return Err(InventoryError::Metadata(format!(
                "role credentials for {} unavailable: {}",
                role, document.code
            )));
        }

        debug!(role = %role, expiration = %document.expiration, "Fetched instance role credentials");
        Ok(RoleCredentials {
            credentials: Credentials {
                access_key_id: document.access_key_id,
                secret_access_key: document.secret_access_key,
                session_token: Some(document.token),
            },
            expiration: document.expiration,
        })
    }
}
