//! Auto Scaling Query API client (`Version=2011-01-01`).

use super::metadata::{InstanceMetadata, RoleCredentials};
use super::sigv4::{self, Credentials, Scope};
use super::{xml, AutoScalingApi, AutoScalingGroup, Page, ScalingActivity};
use crate::inventory::InventoryError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

const API_VERSION: &str = "2011-01-01";
const SERVICE: &str = "autoscaling";

/// Role credentials are refreshed this many minutes before they expire.
const REFRESH_MARGIN_MINUTES: i64 = 5;

pub enum CredentialSource {
    Static(Credentials),
    /// Read from instance metadata and reused until shortly before expiry
    InstanceRole {
        metadata: Arc<dyn InstanceMetadata>,
        cached: RwLock<Option<RoleCredentials>>,
    },
}

impl CredentialSource {
    pub fn instance_role(metadata: Arc<dyn InstanceMetadata>) -> Self {
        CredentialSource::InstanceRole {
            metadata,
            cached: RwLock::new(None),
        }
    }

    pub(crate) async fn current(&self) -> Result<Credentials, InventoryError> {
        let (metadata, cached) = match self {
            CredentialSource::Static(credentials) => return Ok(credentials.clone()),
            CredentialSource::InstanceRole { metadata, cached } => (metadata, cached),
        };

        if let Some(fresh) = fresh_credentials(cached.read().await.as_ref()) {
            return Ok(fresh);
        }

        let mut cached = cached.write().await;
        // Another request may have refreshed while this one waited.
        if let Some(fresh) = fresh_credentials(cached.as_ref()) {
            return Ok(fresh);
        }
        let role = metadata.role_credentials().await?;
        let credentials = role.credentials.clone();
        *cached = Some(role);
        Ok(credentials)
    }
}

fn fresh_credentials(cached: Option<&RoleCredentials>) -> Option<Credentials> {
    cached
        .filter(|role| Utc::now() + chrono::Duration::minutes(REFRESH_MARGIN_MINUTES) < role.expiration)
        .map(|role| role.credentials.clone())
}

pub struct QueryApiClient {
    client: reqwest::Client,
    endpoint: String,
    host: String,
    region: String,
    credentials: CredentialSource,
}

impl QueryApiClient {
    pub fn new(
        endpoint: &str,
        region: &str,
        credentials: CredentialSource,
        timeout: Duration,
    ) -> Result<Self, InventoryError> {
        let url = reqwest::Url::parse(endpoint).map_err(|e| {
            InventoryError::Backend(format!("invalid Auto Scaling endpoint {}: {}", endpoint, e))
        })?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(InventoryError::Backend(format!(
                    "Auto Scaling endpoint {} has no host",
                    endpoint
                )))
            }
        };
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: url.to_string(),
            host,
            region: region.to_string(),
            credentials,
        })
    }

    async fn call(&self, action: &str, params: &[(String, String)]) -> Result<String, InventoryError> {
        let body = [("Action", action), ("Version", API_VERSION)]
            .into_iter()
            .chain(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map(|(k, v)| format!("{}={}", sigv4::uri_encode(k), sigv4::uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let credentials = self.credentials.current().await?;
        let scope = Scope {
            region: &self.region,
            service: SERVICE,
            host: &self.host,
        };
        let headers = sigv4::sign_form_post(&credentials, &scope, &body, &Utc::now());

        debug!(action, "Calling Auto Scaling API");
        let mut request = self.client.post(&self.endpoint).body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(InventoryError::Backend(describe_error(action, status, &text)));
        }
        Ok(text)
    }
}

fn describe_error(action: &str, status: reqwest::StatusCode, body: &str) -> String {
    let error = xml::descend(body, &["ErrorResponse", "Error"]);
    match error {
        Some(error) => format!(
            "{} failed ({}): {}: {}",
            action,
            status,
            xml::child_text(error, "Code").unwrap_or_default(),
            xml::child_text(error, "Message").unwrap_or_default()
        ),
        None => format!("{} failed ({}): {}", action, status, body),
    }
}

fn action_result<'a>(body: &'a str, action: &str) -> Result<&'a str, InventoryError> {
    let response = format!("{}Response", action);
    let result = format!("{}Result", action);
    xml::descend(body, &[response.as_str(), result.as_str()])
        .ok_or_else(|| InventoryError::Backend(format!("unexpected {} response", action)))
}

fn next_token(result: &str) -> Option<String> {
    xml::child_text(result, "NextToken").filter(|token| !token.is_empty())
}

fn number(member: &str, tag: &str) -> Result<i64, InventoryError> {
    xml::child_text(member, tag)
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| InventoryError::Backend(format!("auto scaling group without a valid {}", tag)))
}

pub(crate) fn parse_groups(body: &str) -> Result<Page<AutoScalingGroup>, InventoryError> {
    let result = action_result(body, "DescribeAutoScalingGroups")?;
    let members = xml::child(result, "AutoScalingGroups")
        .map(|groups| xml::children(groups, "member"))
        .unwrap_or_default();

    let items = members
        .into_iter()
        .map(|member| {
            let name = xml::child_text(member, "AutoScalingGroupName").ok_or_else(|| {
                InventoryError::Backend("auto scaling group without a name".to_string())
            })?;
            let instance_ids: Vec<String> = xml::child(member, "Instances")
                .map(|instances| {
                    xml::children(instances, "member")
                        .into_iter()
                        .filter_map(|instance| xml::child_text(instance, "InstanceId"))
                        .collect()
                })
                .unwrap_or_default();
            Ok(AutoScalingGroup {
                name,
                desired_capacity: number(member, "DesiredCapacity")?,
                min_size: number(member, "MinSize")?,
                max_size: number(member, "MaxSize")?,
                instance_ids,
            })
        })
        .collect::<Result<Vec<_>, InventoryError>>()?;

    Ok(Page {
        items,
        next_token: next_token(result),
    })
}

pub(crate) fn parse_activities(body: &str) -> Result<Page<ScalingActivity>, InventoryError> {
    let result = action_result(body, "DescribeScalingActivities")?;
    let items = xml::child(result, "Activities")
        .map(|activities| xml::children(activities, "member"))
        .unwrap_or_default()
        .into_iter()
        .map(|member| ScalingActivity {
            activity_id: xml::child_text(member, "ActivityId").unwrap_or_default(),
            status_code: xml::child_text(member, "StatusCode").unwrap_or_default(),
        })
        .collect();

    Ok(Page {
        items,
        next_token: next_token(result),
    })
}

#[async_trait]
impl AutoScalingApi for QueryApiClient {
    async fn describe_auto_scaling_groups(
        &self,
        names: &[String],
        next_token: Option<&str>,
    ) -> Result<Page<AutoScalingGroup>, InventoryError> {
        let mut params: Vec<(String, String)> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (format!("AutoScalingGroupNames.member.{}", i + 1), name.clone()))
            .collect();
        if let Some(token) = next_token {
            params.push(("NextToken".to_string(), token.to_string()));
        }
        let body = self.call("DescribeAutoScalingGroups", &params).await?;
        parse_groups(&body)
    }

    async fn describe_scaling_activities(
        &self,
        group_name: &str,
        next_token: Option<&str>,
    ) -> Result<Page<ScalingActivity>, InventoryError> {
        let mut params = vec![("AutoScalingGroupName".to_string(), group_name.to_string())];
        if let Some(token) = next_token {
            params.push(("NextToken".to_string(), token.to_string()));
        }
        let body = self.call("DescribeScalingActivities", &params).await?;
        parse_activities(&body)
    }

    async fn set_desired_capacity(
        &self,
        group_name: &str,
        desired_capacity: i64,
        honor_cooldown: bool,
    ) -> Result<(), InventoryError> {
        let params = vec![
            ("AutoScalingGroupName".to_string(), group_name.to_string()),
            ("DesiredCapacity".to_string(), desired_capacity.to_string()),
            ("HonorCooldown".to_string(), honor_cooldown.to_string()),
        ];
        self.call("SetDesiredCapacity", &params).await?;
        Ok(())
    }
}
