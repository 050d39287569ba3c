//! EC2 auto scaling group as a fleet.
//!
//! The group is the one containing the instance the autoscaler runs on,
//! unless a group name is configured. It is looked up on first use and the
//! name kept for the life of the process.

use super::{ensure_ready, CapacityBounds, Inventory, InventoryError, SettleDown, Status};
use crate::config::duration;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub mod metadata;
pub mod query;
pub mod sigv4;
pub mod xml;

pub use metadata::{ImdsClient, InstanceMetadata, RoleCredentials};
pub use query::{CredentialSource, QueryApiClient};
pub use sigv4::Credentials;

#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default, deserialize_with = "duration::deserialize")]
    pub settle_down_period: Duration,

    /// Skip the instance lookup and manage this group directly
    #[serde(default)]
    pub auto_scaling_group: Option<String>,

    /// Static credentials; the instance role is used when absent
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,

    /// Override for the regional Auto Scaling endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,

    #[serde(default = "default_timeout", deserialize_with = "duration::deserialize")]
    pub timeout: Duration,
}

fn default_region() -> String {
    "eu-west-1".to_string()
}

fn default_metadata_url() -> String {
    "http://169.254.169.254".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoScalingGroup {
    pub name: String,
    pub desired_capacity: i64,
    pub min_size: i64,
    pub max_size: i64,
    pub instance_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingActivity {
    pub activity_id: String,
    pub status_code: String,
}

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// The Auto Scaling operations the inventory needs.
#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    /// An empty `names` lists every group in the region.
    async fn describe_auto_scaling_groups(
        &self,
        names: &[String],
        next_token: Option<&str>,
    ) -> Result<Page<AutoScalingGroup>, InventoryError>;

    async fn describe_scaling_activities(
        &self,
        group_name: &str,
        next_token: Option<&str>,
    ) -> Result<Page<ScalingActivity>, InventoryError>;

    async fn set_desired_capacity(
        &self,
        group_name: &str,
        desired_capacity: i64,
        honor_cooldown: bool,
    ) -> Result<(), InventoryError>;
}

pub struct AwsInventory {
    api: Arc<dyn AutoScalingApi>,
    metadata: Arc<dyn InstanceMetadata>,
    group_name: OnceCell<String>,
    settle: SettleDown,
}

impl AwsInventory {
    pub fn new(
        api: Arc<dyn AutoScalingApi>,
        metadata: Arc<dyn InstanceMetadata>,
        settle_down_period: Duration,
    ) -> Self {
        Self {
            api,
            metadata,
            group_name: OnceCell::new(),
            settle: SettleDown::new(settle_down_period),
        }
    }

    pub fn with_group_name(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = OnceCell::new_with(Some(group_name.into()));
        self
    }

    pub fn from_config(config: &AwsConfig) -> Result<Self, InventoryError> {
        let metadata: Arc<dyn InstanceMetadata> =
            Arc::new(ImdsClient::new(&config.metadata_url, config.timeout)?);

        let credentials = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                CredentialSource::Static(Credentials {
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                    session_token: config.session_token.clone(),
                })
            }
            (None, None) => CredentialSource::instance_role(metadata.clone()),
            _ => {
                return Err(InventoryError::Backend(
                    "access_key_id and secret_access_key must be set together".to_string(),
                ))
            }
        };

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://autoscaling.{}.amazonaws.com/", config.region));
        let api = QueryApiClient::new(&endpoint, &config.region, credentials, config.timeout)?;

        let inventory = Self::new(Arc::new(api), metadata, config.settle_down_period);
        Ok(match &config.auto_scaling_group {
            Some(name) => inventory.with_group_name(name.clone()),
            None => inventory,
        })
    }

    pub async fn group_name(&self) -> Result<&str, InventoryError> {
        self.group_name
            .get_or_try_init(|| self.find_group_of_this_instance())
            .await
            .map(String::as_str)
    }

    async fn find_group_of_this_instance(&self) -> Result<String, InventoryError> {
        let instance_id = self.metadata.instance_id().await?;
        debug!(instance_id = %instance_id, "Looking up the auto scaling group of this instance");

        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .api
                .describe_auto_scaling_groups(&[], next_token.as_deref())
                .await?;
            if let Some(group) = page
                .items
                .into_iter()
                .find(|group| group.instance_ids.iter().any(|id| *id == instance_id))
            {
                info!(group = %group.name, instance_id = %instance_id, "Managing auto scaling group");
                return Ok(group.name);
            }
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Err(InventoryError::GroupNotFound(instance_id)),
            }
        }
    }

    async fn describe_group(&self) -> Result<AutoScalingGroup, InventoryError> {
        let name = self.group_name().await?.to_string();
        let names = [name.clone()];

        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .api
                .describe_auto_scaling_groups(&names, next_token.as_deref())
                .await?;
            if let Some(group) = page.items.into_iter().find(|group| group.name == name) {
                return Ok(group);
            }
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Err(InventoryError::GroupNotFound(name)),
            }
        }
    }
}

#[async_trait]
impl Inventory for AwsInventory {
    async fn total(&self) -> Result<i64, InventoryError> {
        Ok(self.describe_group().await?.instance_ids.len() as i64)
    }

    async fn status(&self) -> Result<Status, InventoryError> {
        let name = self.group_name().await?;
        let mut status = Status::Ok;

        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .api
                .describe_scaling_activities(name, next_token.as_deref())
                .await?;
            debug!(
                activities = page.items.len(),
                "Checking pre-existing scaling activities"
            );
            for activity in &page.items {
                match activity.status_code.as_str() {
                    "Successful" | "Cancelled" => continue,
                    "Failed" => {
                        debug!(activity = %activity.activity_id, "Found a failed activity");
                        return Ok(Status::Failed);
                    }
                    _ => {
                        debug!(
                            activity = %activity.activity_id,
                            status_code = %activity.status_code,
                            "Found an in-progress activity"
                        );
                        status = Status::Updating;
                    }
                }
            }
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        if status == Status::Ok && self.settle.is_settling() {
            debug!("Still within settle down period");
            status = Status::Updating;
        }
        Ok(status)
    }

    async fn scale(&self, amount: i64) -> Result<(), InventoryError> {
        ensure_ready(self.status().await?)?;

        let group = self.describe_group().await?;
        let desired_capacity = group.desired_capacity + amount;
        info!(
            group = %group.name,
            current = group.desired_capacity,
            desired = desired_capacity,
            "Computed new desired capacity"
        );
        CapacityBounds::new(Some(group.min_size), Some(group.max_size)).check(desired_capacity)?;

        self.api
            .set_desired_capacity(&group.name, desired_capacity, false)
            .await?;
        self.settle.record_modification();

        info!(group = %group.name, amount, "Scaled auto scaling group");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedInstance(&'static str);

    #[async_trait]
    impl InstanceMetadata for FixedInstance {
        async fn instance_id(&self) -> Result<String, InventoryError> {
            Ok(self.0.to_string())
        }

        async fn role_credentials(&self) -> Result<RoleCredentials, InventoryError> {
            Err(InventoryError::Metadata("no role".to_string()))
        }
    }

    #[derive(Default)]
    struct ScriptedApi {
        group_pages: Vec<Page<AutoScalingGroup>>,
        activity_pages: Vec<Page<ScalingActivity>>,
        activity_requests: AtomicUsize,
        describe_requests: AtomicUsize,
        set_calls: Mutex<VecDeque<(String, i64, bool)>>,
    }

    fn token_index(token: Option<&str>) -> usize {
        token.map_or(0, |t| t.parse().unwrap())
    }

    #[async_trait]
    impl AutoScalingApi for ScriptedApi {
        async fn describe_auto_scaling_groups(
            &self,
            _names: &[String],
            next_token: Option<&str>,
        ) -> Result<Page<AutoScalingGroup>, InventoryError> {
            self.describe_requests.fetch_add(1, Ordering::SeqCst);
            Ok(self.group_pages[token_index(next_token)].clone())
        }

        async fn describe_scaling_activities(
            &self,
            _group_name: &str,
            next_token: Option<&str>,
        ) -> Result<Page<ScalingActivity>, InventoryError> {
            self.activity_requests.fetch_add(1, Ordering::SeqCst);
            Ok(self.activity_pages[token_index(next_token)].clone())
        }

        async fn set_desired_capacity(
            &self,
            group_name: &str,
            desired_capacity: i64,
            honor_cooldown: bool,
        ) -> Result<(), InventoryError> {
            self.set_calls.lock().unwrap().push_back((
                group_name.to_string(),
                desired_capacity,
                honor_cooldown,
            ));
            Ok(())
        }
    }

    fn group(name: &str, desired: i64, min: i64, max: i64, ids: &[&str]) -> AutoScalingGroup {
        AutoScalingGroup {
            name: name.to_string(),
            desired_capacity: desired,
            min_size: min,
            max_size: max,
            instance_ids: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    fn activities(codes: &[&str], next_token: Option<&str>) -> Page<ScalingActivity> {
        Page {
            items: codes
                .iter()
                .enumerate()
                .map(|(i, code)| ScalingActivity {
                    activity_id: format!("a-{i}"),
                    status_code: code.to_string(),
                })
                .collect(),
            next_token: next_token.map(str::to_string),
        }
    }

    fn single_group_page(g: AutoScalingGroup) -> Vec<Page<AutoScalingGroup>> {
        vec![Page {
            items: vec![g],
            next_token: None,
        }]
    }

    fn inventory(api: ScriptedApi, settle: Duration) -> (AwsInventory, Arc<ScriptedApi>) {
        let api = Arc::new(api);
        let inventory = AwsInventory::new(api.clone(), Arc::new(FixedInstance("i-self")), settle);
        (inventory, api)
    }

    #[tokio::test]
    async fn test_group_found_on_a_later_page_and_cached() {
        let (inventory, api) = inventory(
            ScriptedApi {
                group_pages: vec![
                    Page {
                        items: vec![group("other", 2, 1, 5, &["i-a", "i-b"])],
                        next_token: Some("1".to_string()),
                    },
                    Page {
                        items: vec![group("web", 3, 1, 5, &["i-c", "i-self", "i-d"])],
                        next_token: None,
                    },
                ],
                ..ScriptedApi::default()
            },
            Duration::ZERO,
        );

        assert_eq!(inventory.group_name().await.unwrap(), "web");
        assert_eq!(inventory.group_name().await.unwrap(), "web");
        assert_eq!(api.describe_requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_group_is_reported_with_instance_id() {
        let (inventory, _) = inventory(
            ScriptedApi {
                group_pages: single_group_page(group("other", 2, 1, 5, &["i-a"])),
                ..ScriptedApi::default()
            },
            Duration::ZERO,
        );

        let err = inventory.total().await.unwrap_err();
        assert!(matches!(err, InventoryError::GroupNotFound(ref id) if id == "i-self"));
    }

    #[tokio::test]
    async fn test_status_failed_short_circuits_pagination() {
        let (inventory, api) = inventory(
            ScriptedApi {
                activity_pages: vec![
                    activities(&["Successful", "Failed"], Some("1")),
                    activities(&["InProgress"], None),
                ],
                ..ScriptedApi::default()
            },
            Duration::ZERO,
        );
        let inventory = inventory.with_group_name("web");

        assert_eq!(inventory.status().await.unwrap(), Status::Failed);
        assert_eq!(api.activity_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_exhausts_pages() {
        let (inventory, api) = inventory(
            ScriptedApi {
                activity_pages: vec![
                    activities(&["PreInService"], Some("1")),
                    activities(&["Successful", "Cancelled"], Some("2")),
                    activities(&["Failed"], None),
                ],
                ..ScriptedApi::default()
            },
            Duration::ZERO,
        );
        let inventory = inventory.with_group_name("web");

        assert_eq!(inventory.status().await.unwrap(), Status::Failed);
        assert_eq!(api.activity_requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_activities_are_ok() {
        let (inventory, _) = inventory(
            ScriptedApi {
                activity_pages: vec![activities(&["Successful", "Cancelled"], None)],
                ..ScriptedApi::default()
            },
            Duration::ZERO,
        );
        let inventory = inventory.with_group_name("web");
        assert_eq!(inventory.status().await.unwrap(), Status::Ok);
    }

    #[tokio::test]
    async fn test_scale_sets_desired_capacity_without_cooldown() {
        let (inventory, api) = inventory(
            ScriptedApi {
                group_pages: single_group_page(group("web", 3, 1, 5, &["i-self"])),
                activity_pages: vec![activities(&["Successful"], None)],
                ..ScriptedApi::default()
            },
            Duration::ZERO,
        );

        inventory.increase().await.unwrap();
        let calls = api.set_calls.lock().unwrap().clone();
        assert_eq!(calls, VecDeque::from([("web".to_string(), 4, false)]));
    }

    #[tokio::test]
    async fn test_scale_below_min_size_is_refused() {
        let (inventory, api) = inventory(
            ScriptedApi {
                group_pages: single_group_page(group("web", 2, 2, 5, &["i-self"])),
                activity_pages: vec![activities(&[], None)],
                ..ScriptedApi::default()
            },
            Duration::ZERO,
        );

        let err = inventory.decrease().await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::BelowMinimum {
                requested: 1,
                minimum: 2
            }
        ));
        assert!(api.set_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scale_refused_while_updating() {
        let (inventory, api) = inventory(
            ScriptedApi {
                group_pages: single_group_page(group("web", 3, 1, 5, &["i-self"])),
                activity_pages: vec![activities(&["InProgress"], None)],
                ..ScriptedApi::default()
            },
            Duration::ZERO,
        );

        assert!(matches!(
            inventory.increase().await,
            Err(InventoryError::Updating)
        ));
        assert!(api.set_calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_down_blocks_second_scale() {
        let (inventory, api) = inventory(
            ScriptedApi {
                group_pages: single_group_page(group("web", 3, 1, 5, &["i-self"])),
                activity_pages: vec![activities(&["Successful"], None)],
                ..ScriptedApi::default()
            },
            Duration::from_secs(120),
        );

        inventory.increase().await.unwrap();
        assert_eq!(inventory.status().await.unwrap(), Status::Updating);
        assert!(matches!(
            inventory.increase().await,
            Err(InventoryError::Updating)
        ));
        assert_eq!(api.set_calls.lock().unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(inventory.status().await.unwrap(), Status::Ok);
    }
}
