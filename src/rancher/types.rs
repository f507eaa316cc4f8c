//! Rancher API resource types used by the upgrade workflow.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of plain services; load balancers use a different kind.
pub const SERVICE_KIND: &str = "service";

/// Control plane progress flag for a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transitioning {
    Yes,
    Error,
    #[default]
    #[serde(other)]
    No,
}

/// Image and environment for one container of a service.
///
/// Fields the upgrade workflow does not touch are kept in `extra` so they
/// are submitted back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    #[serde(default)]
    pub image_uuid: String,
    #[serde(default, deserialize_with = "deserialize_environment")]
    pub environment: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Point-in-time snapshot of a Rancher service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub transitioning: Transitioning,
    #[serde(default)]
    pub transitioning_message: Option<String>,
    #[serde(default)]
    pub launch_config: LaunchConfig,
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub secondary_launch_configs: Vec<LaunchConfig>,
}

impl Service {
    pub fn is_transitioning(&self) -> bool {
        self.transitioning == Transitioning::Yes
    }

    /// Image of the primary launch config.
    pub fn image(&self) -> &str {
        &self.launch_config.image_uuid
    }
}

/// Body of the `upgrade` action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUpgrade {
    pub in_service_strategy: InServiceStrategy,
}

/// Rolling strategy: replace containers `batch_size` at a time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InServiceStrategy {
    pub batch_size: u32,
    pub interval_millis: u64,
    pub start_first: bool,
    pub launch_config: LaunchConfig,
    pub secondary_launch_configs: Vec<LaunchConfig>,
}

/// Rancher collection envelope.
#[derive(Debug, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Rancher error body.
#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Filters accepted by the services collection endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFilter {
    pub name: Option<String>,
    pub name_prefix: Option<String>,
    pub kind: Option<String>,
}

impl ServiceFilter {
    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// Plain services whose name starts with `prefix`.
    pub fn services_like(prefix: &str) -> Self {
        Self {
            name_prefix: Some(prefix.to_string()),
            kind: Some(SERVICE_KIND.to_string()),
            ..Default::default()
        }
    }

    /// Query parameters in Rancher filter syntax.
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(name) = &self.name {
            query.push(("name", name.clone()));
        }
        if let Some(prefix) = &self.name_prefix {
            query.push(("name_like", format!("{}%", prefix)));
        }
        if let Some(kind) = &self.kind {
            query.push(("kind", kind.clone()));
        }
        query
    }
}

// Rancher returns environment values as arbitrary JSON scalars.
fn deserialize_environment<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, value)
        })
        .collect())
}

fn deserialize_null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
