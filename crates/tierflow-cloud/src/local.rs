//! Local state-file backend
//!
//! Simulates a cloud provider by recording resources in the state file.
//! Identifiers are stable per resource name and computed outputs are
//! synthesized per kind, which makes `plan`/`apply`/`destroy` runnable
//! without cloud credentials.

use crate::error::Result;
use crate::kind::ResourceKind;
use crate::locks::NameLocks;
use crate::provider::{
    DeleteOutcome, Outputs, ProvisionedResource, ProvisioningBackend, RecordedResource, Zone,
};
use crate::state::{ResourceState, ResourceStatus, StateManager, state_key};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::Path;
use tokio::sync::Mutex;

const DEFAULT_ZONE_SUFFIXES: [&str; 3] = ["a", "b", "c"];

/// Backend that provisions into `<root>/.tierflow/state.json`
pub struct LocalBackend {
    state: StateManager,
    region: String,
    zones: Option<Vec<Zone>>,
    locks: NameLocks,
    // read-modify-write of the shared state file
    file: Mutex<()>,
}

impl LocalBackend {
    pub fn new(project_root: impl AsRef<Path>, region: impl Into<String>) -> Self {
        Self {
            state: StateManager::new(project_root),
            region: region.into(),
            zones: None,
            locks: NameLocks::new(),
            file: Mutex::new(()),
        }
    }

    /// Override the zones reported by `list_zones`
    pub fn with_zones(mut self, zones: Vec<Zone>) -> Self {
        self.zones = Some(zones);
        self
    }

    pub fn state_manager(&self) -> &StateManager {
        &self.state
    }

    fn new_id(kind: ResourceKind) -> String {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", kind.id_prefix(), &hex[..17])
    }

    fn arn(&self, service: &str, resource: &str) -> String {
        format!("arn:local:{}:{}:000000000000:{}", service, self.region, resource)
    }

    /// Computed attributes a real provider would report for `kind`
    fn synthesize_outputs(
        &self,
        kind: ResourceKind,
        name: &str,
        id: &str,
        inputs: &serde_json::Value,
        previous: Option<&ResourceState>,
    ) -> Outputs {
        let mut outputs = Outputs::new();
        outputs.insert("id".to_string(), json!(id));
        outputs.insert("name".to_string(), json!(name));

        let input = |key: &str| inputs.get(key).cloned().unwrap_or(serde_json::Value::Null);
        let suffix = id.split_once('-').map(|(_, s)| s).unwrap_or(id);

        match kind {
            ResourceKind::Vpc => {
                outputs.insert("cidr_block".to_string(), input("cidr_block"));
            }
            ResourceKind::Subnet => {
                outputs.insert("cidr_block".to_string(), input("cidr_block"));
                outputs.insert("availability_zone".to_string(), input("availability_zone"));
            }
            ResourceKind::SecurityGroup => {
                outputs.insert("arn".to_string(), json!(self.arn("ec2", id)));
            }
            ResourceKind::DbInstance => {
                let address = format!("{}.{}.{}.rds.local", name, suffix, self.region);
                let port = inputs.get("port").cloned().unwrap_or(json!(5432));
                outputs.insert("endpoint".to_string(), json!(format!("{}:{}", address, port)));
                outputs.insert("address".to_string(), json!(address));
                outputs.insert("port".to_string(), port);
                outputs.insert("arn".to_string(), json!(self.arn("rds", name)));
            }
            ResourceKind::LaunchTemplate => {
                // Every change of inputs publishes a new template version
                let version = match previous {
                    Some(prev) if prev.inputs == *inputs => {
                        prev.get_output::<u64>("latest_version").unwrap_or(1)
                    }
                    Some(prev) => prev.get_output::<u64>("latest_version").unwrap_or(1) + 1,
                    None => 1,
                };
                outputs.insert("latest_version".to_string(), json!(version));
            }
            ResourceKind::LoadBalancer => {
                let short: String = suffix.chars().take(8).collect();
                let dns_name = format!("{}-{}.{}.elb.local", name, short, self.region);
                outputs.insert("dns_name".to_string(), json!(dns_name));
                outputs.insert("zone_id".to_string(), json!("ZLOCALELB0001"));
                outputs.insert(
                    "arn".to_string(),
                    json!(self.arn("elasticloadbalancing", &format!("loadbalancer/app/{}", name))),
                );
            }
            ResourceKind::TargetGroup => {
                outputs.insert(
                    "arn".to_string(),
                    json!(self.arn("elasticloadbalancing", &format!("targetgroup/{}", name))),
                );
            }
            ResourceKind::Listener => {
                outputs.insert(
                    "arn".to_string(),
                    json!(self.arn("elasticloadbalancing", &format!("listener/{}", name))),
                );
            }
            ResourceKind::AutoScalingGroup | ResourceKind::ScalingPolicy => {
                outputs.insert("arn".to_string(), json!(self.arn("autoscaling", name)));
            }
            ResourceKind::DnsRecord => {
                outputs.insert("fqdn".to_string(), input("name"));
            }
            ResourceKind::SnsTopic => {
                outputs.insert("arn".to_string(), json!(self.arn("sns", name)));
            }
            ResourceKind::SnsSubscription => {
                outputs.insert(
                    "arn".to_string(),
                    json!(self.arn("sns", &format!("{}:{}", name, suffix))),
                );
            }
            ResourceKind::IamRole => {
                outputs.insert("arn".to_string(), json!(self.arn("iam", &format!("role/{}", name))));
            }
            ResourceKind::LambdaFunction => {
                let arn = self.arn("lambda", &format!("function:{}", name));
                outputs.insert("invoke_arn".to_string(), json!(format!("{}/invocations", arn)));
                outputs.insert("arn".to_string(), json!(arn));
            }
            ResourceKind::InternetGateway
            | ResourceKind::RouteTable
            | ResourceKind::Route
            | ResourceKind::RouteTableAssociation
            | ResourceKind::DbSubnetGroup
            | ResourceKind::LambdaPermission => {}
        }

        outputs
    }
}

#[async_trait]
impl ProvisioningBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn list_zones(&self, region: &str) -> Result<Vec<Zone>> {
        if let Some(zones) = &self.zones {
            return Ok(zones.clone());
        }
        Ok(DEFAULT_ZONE_SUFFIXES
            .iter()
            .map(|suffix| Zone::new(format!("{}{}", region, suffix)))
            .collect())
    }

    async fn create_or_update(
        &self,
        kind: ResourceKind,
        name: &str,
        inputs: &serde_json::Value,
    ) -> Result<ProvisionedResource> {
        let key = state_key(kind, name);
        let _name_guard = self.locks.lock(&key).await;
        let _file_guard = self.file.lock().await;

        let mut state = self.state.load().await?;
        let previous = state.get_resource(&key).cloned();

        let id = previous
            .as_ref()
            .map(|r| r.id.clone())
            .unwrap_or_else(|| Self::new_id(kind));
        let outputs = self.synthesize_outputs(kind, name, &id, inputs, previous.as_ref());

        let mut resource = match previous {
            Some(prev) if prev.inputs == *inputs && prev.outputs == outputs => {
                tracing::debug!("{} {} is up to date", kind, name);
                return Ok(ProvisionedResource { id, outputs });
            }
            Some(prev) => {
                tracing::info!("Updating {} {} ({})", kind, name, id);
                prev
            }
            None => {
                tracing::info!("Creating {} {} ({})", kind, name, id);
                ResourceState::new(id.clone(), kind)
            }
        };

        resource.status = ResourceStatus::Ready;
        resource.inputs = inputs.clone();
        resource.outputs = outputs.clone();
        resource.updated_at = Utc::now();

        state.set_resource(key, resource);
        self.state.save(&state).await?;

        Ok(ProvisionedResource { id, outputs })
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<DeleteOutcome> {
        let key = state_key(kind, name);
        let _name_guard = self.locks.lock(&key).await;
        let _file_guard = self.file.lock().await;

        let mut state = self.state.load().await?;
        match state.remove_resource(&key) {
            Some(resource) => {
                self.state.save(&state).await?;
                tracing::info!("Deleted {} {} ({})", kind, name, resource.id);
                Ok(DeleteOutcome::Deleted)
            }
            None => {
                tracing::debug!("{} {} already absent", kind, name);
                Ok(DeleteOutcome::Absent)
            }
        }
    }

    async fn describe(&self, kind: ResourceKind, name: &str) -> Result<Option<ResourceState>> {
        let _file_guard = self.file.lock().await;
        let state = self.state.load().await?;
        Ok(state.get_resource(&state_key(kind, name)).cloned())
    }

    async fn list_resources(&self) -> Result<Vec<RecordedResource>> {
        let _file_guard = self.file.lock().await;
        let state = self.state.load().await?;

        let mut recorded: Vec<_> = state.resources.iter().collect();
        recorded.sort_by_key(|(_, resource)| resource.created_at);
        Ok(recorded
            .into_iter()
            .map(|(key, resource)| RecordedResource {
                kind: resource.kind,
                name: key
                    .split_once(':')
                    .map(|(_, name)| name)
                    .unwrap_or(key)
                    .to_string(),
                id: resource.id.clone(),
            })
            .collect())
    }
}
