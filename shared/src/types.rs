use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ========== RESOURCE TYPES ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    #[serde(rename = "notebook-instance")]
    NotebookInstance,
    #[serde(rename = "endpoint")]
    Endpoint,
    #[serde(rename = "emr-cluster")]
    EmrCluster,
    #[serde(rename = "endpoint-config")]
    EndpointConfig,
    #[serde(rename = "model")]
    Model,
    #[serde(rename = "training-job")]
    TrainingJob,
    #[serde(rename = "transform-job")]
    TransformJob,
    #[serde(rename = "hpo-job")]
    HpoJob,
    #[serde(rename = "labeling-job")]
    LabelingJob,
    #[serde(rename = "batch-translate-job")]
    BatchTranslateJob,
}

impl ResourceType {
    /// Only these types ever carry a termination schedule.
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            ResourceType::NotebookInstance | ResourceType::Endpoint | ResourceType::EmrCluster
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::NotebookInstance => "notebook-instance",
            ResourceType::Endpoint => "endpoint",
            ResourceType::EmrCluster => "emr-cluster",
            ResourceType::EndpointConfig => "endpoint-config",
            ResourceType::Model => "model",
            ResourceType::TrainingJob => "training-job",
            ResourceType::TransformJob => "transform-job",
            ResourceType::HpoJob => "hpo-job",
            ResourceType::LabelingJob => "labeling-job",
            ResourceType::BatchTranslateJob => "batch-translate-job",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notebook-instance" => Ok(ResourceType::NotebookInstance),
            "endpoint" => Ok(ResourceType::Endpoint),
            "emr-cluster" => Ok(ResourceType::EmrCluster),
            "endpoint-config" => Ok(ResourceType::EndpointConfig),
            "model" => Ok(ResourceType::Model),
            "training-job" => Ok(ResourceType::TrainingJob),
            "transform-job" => Ok(ResourceType::TransformJob),
            "hpo-job" => Ok(ResourceType::HpoJob),
            "labeling-job" => Ok(ResourceType::LabelingJob),
            "batch-translate-job" => Ok(ResourceType::BatchTranslateJob),
            other => Err(format!("Unrecognized resource type '{}'", other)),
        }
    }
}

// ========== RESOURCE SCHEDULER ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResourceSchedulerRecord {
    pub resource_id: String,
    pub resource_type: ResourceType,
    /// Epoch seconds after which the resource should be stopped/terminated.
    pub termination_time: i64,
    pub project: String,
}

#[derive(Debug, Deserialize)]
pub struct SetScheduleRequest {
    pub termination_time: i64,
    pub project: String,
}

// ========== RESOURCE METADATA ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResourceMetadataRecord {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub user: String,
    pub project: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SyncResourceRequest {
    pub user: String,
    pub project: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct PagedRecords {
    pub records: Vec<ResourceMetadataRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

// ========== APP CONFIGURATION ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfigurationRecord {
    pub config_scope: String,
    pub version_id: i64,
    pub changed_by: String,
    pub change_reason: String,
    pub created_at: String,
    pub configuration: AppConfiguration,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfiguration {
    /// service name -> activated
    pub enabled_services: std::collections::HashMap<String, bool>,
    #[serde(default)]
    pub manage_iam_roles: bool,
    /// Default TTL in hours applied when a schedulable resource is provisioned.
    #[serde(default)]
    pub default_resource_ttl_hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppConfigRequest {
    pub version_id: i64,
    pub change_reason: String,
    pub configuration: AppConfiguration,
}

// ========== CONFIG PROFILE (DCP) ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConfigProfileRecord {
    pub name: String,
    pub version_id: i64,
    pub created_by: String,
    pub created_at: String,
    pub notebook_instance_types: Vec<String>,
    pub training_instance_types: Vec<String>,
    pub endpoint_instance_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateConfigProfileRequest {
    pub name: String,
    pub notebook_instance_types: Vec<String>,
    pub training_instance_types: Vec<String>,
    pub endpoint_instance_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigProfileRequest {
    pub version_id: i64,
    pub notebook_instance_types: Option<Vec<String>>,
    pub training_instance_types: Option<Vec<String>>,
    pub endpoint_instance_types: Option<Vec<String>>,
}

// ========== PROJECT ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Project {
    pub name: String,
    pub description: Option<String>,
    pub suspended: bool,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

// ========== USER ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub suspended: bool,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProjectUser {
    pub project: String,
    pub user: String,
    pub role: String, // owner | member
}

#[derive(Debug, Deserialize)]
pub struct AddProjectUserRequest {
    #[serde(default = "default_member_role")]
    pub role: String,
}

fn default_member_role() -> String {
    "member".to_string()
}
