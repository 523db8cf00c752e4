//! Core data models for workload building

use crate::error::BuildError;
use crate::quantity::ParsedQuantity;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Annotation carrying the desired QoS class
pub const QOS_ANNOTATION: &str = "qos";

/// Annotation carrying whether the QoS class may be reached by auto-upgrade
pub const AUTO_QOS_ANNOTATION: &str = "autoQos";

/// Annotation carrying the pull policy until `finish` applies it to containers
pub const IMAGE_PULL_POLICY_ANNOTATION: &str = "imagePullPolicy";

/// Namespace assigned when none was set
pub const DEFAULT_NAMESPACE: &str = "default";

/// Resource names accepted by resource setters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceName {
    /// CPU, in cores (500m = .5 cores)
    #[serde(rename = "cpu")]
    Cpu,
    /// Memory, in bytes (500Gi = 500GiB)
    #[serde(rename = "memory")]
    Memory,
    /// Volume size, in bytes
    #[serde(rename = "storage")]
    Storage,
    /// Local ephemeral storage, in bytes
    #[serde(rename = "ephemeral-storage")]
    EphemeralStorage,
    #[serde(rename = "alpha.kubernetes.io/nvidia-gpu")]
    NvidiaGpu,
}

impl ResourceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceName::Cpu => "cpu",
            ResourceName::Memory => "memory",
            ResourceName::Storage => "storage",
            ResourceName::EphemeralStorage => "ephemeral-storage",
            ResourceName::NvidiaGpu => "alpha.kubernetes.io/nvidia-gpu",
        }
    }

    /// Only cpu and memory take part in QoS classification
    pub fn is_qos_compute(&self) -> bool {
        matches!(self, ResourceName::Cpu | ResourceName::Memory)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceName {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(ResourceName::Cpu),
            "memory" => Ok(ResourceName::Memory),
            "storage" => Ok(ResourceName::Storage),
            "ephemeral-storage" => Ok(ResourceName::EphemeralStorage),
            "alpha.kubernetes.io/nvidia-gpu" => Ok(ResourceName::NvidiaGpu),
            other => Err(BuildError::UnknownResource {
                name: other.to_string(),
            }),
        }
    }
}

/// Resource name to quantity string mapping, as callers write it
pub type ResourceMap = BTreeMap<ResourceName, String>;

/// Convert a resource map into the Kubernetes representation, validating
/// every quantity.
pub fn resource_map_to_k8s(map: &ResourceMap) -> Result<BTreeMap<String, Quantity>, BuildError> {
    if map.is_empty() {
        return Err(BuildError::EmptyResources);
    }

    map.iter()
        .map(|(name, value)| {
            ParsedQuantity::parse(value).map_err(|_| BuildError::InvalidQuantity {
                resource: name.to_string(),
                value: value.clone(),
            })?;
            Ok((name.to_string(), Quantity(value.trim().to_string())))
        })
        .collect()
}

/// Build a resource map from string-keyed pairs such as a parsed config table
pub fn resource_map_from_pairs<I, K, V>(pairs: I) -> Result<ResourceMap, BuildError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(name, value)| Ok((name.as_ref().parse::<ResourceName>()?, value.into())))
        .collect()
}

/// Policy for if/when to pull a container image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    Always,
    Never,
    #[default]
    IfNotPresent,
}

impl PullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::Never => "Never",
            PullPolicy::IfNotPresent => "IfNotPresent",
        }
    }

    /// Unknown values fall back to `IfNotPresent`
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "Always" => PullPolicy::Always,
            "Never" => PullPolicy::Never,
            _ => PullPolicy::IfNotPresent,
        }
    }
}

/// Scheme used by HTTP probes and lifecycle hooks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UriScheme {
    #[default]
    Http,
    Https,
}

impl UriScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UriScheme::Http => "HTTP",
            UriScheme::Https => "HTTPS",
        }
    }
}

/// Timing shared by every probe kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTiming {
    /// Seconds before the first probe; non-positive values become 30
    #[serde(default)]
    pub initial_delay_secs: i32,
    #[serde(default)]
    pub timeout_secs: i32,
    #[serde(default)]
    pub period_secs: i32,
}

impl ProbeTiming {
    pub fn new(initial_delay_secs: i32, timeout_secs: i32, period_secs: i32) -> Self {
        Self {
            initial_delay_secs,
            timeout_secs,
            period_secs,
        }
    }
}

/// Operator of a node affinity requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

impl NodeSelectorOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeSelectorOperator::In => "In",
            NodeSelectorOperator::NotIn => "NotIn",
            NodeSelectorOperator::Exists => "Exists",
            NodeSelectorOperator::DoesNotExist => "DoesNotExist",
            NodeSelectorOperator::Gt => "Gt",
            NodeSelectorOperator::Lt => "Lt",
        }
    }
}

/// Operator of a selector `matchExpressions` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl LabelSelectorOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelSelectorOperator::In => "In",
            LabelSelectorOperator::NotIn => "NotIn",
            LabelSelectorOperator::Exists => "Exists",
            LabelSelectorOperator::DoesNotExist => "DoesNotExist",
        }
    }

    /// In and NotIn need values, Exists and DoesNotExist take none
    pub fn takes_values(&self) -> bool {
        matches!(self, LabelSelectorOperator::In | LabelSelectorOperator::NotIn)
    }
}

/// One `matchExpressions` entry of a workload selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRequirement {
    pub key: String,
    pub operator: LabelSelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelRequirement {
    pub fn new<I, S>(key: impl Into<String>, operator: LabelSelectorOperator, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// How a toleration matches a taint's value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

impl TolerationOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            TolerationOperator::Equal => "Equal",
            TolerationOperator::Exists => "Exists",
        }
    }
}

/// Effect of a node taint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl TaintEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaintEffect::NoSchedule => "NoSchedule",
            TaintEffect::PreferNoSchedule => "PreferNoSchedule",
            TaintEffect::NoExecute => "NoExecute",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_name_round_trip_strings() {
        for name in [
            ResourceName::Cpu,
            ResourceName::Memory,
            ResourceName::Storage,
            ResourceName::EphemeralStorage,
            ResourceName::NvidiaGpu,
        ] {
            assert_eq!(name.as_str().parse::<ResourceName>().unwrap(), name);
        }
        assert!("gpu".parse::<ResourceName>().is_err());
    }

    #[test]
    fn test_resource_map_to_k8s() {
        let map = ResourceMap::from([
            (ResourceName::Cpu, "200m".to_string()),
            (ResourceName::Memory, " 1Gi ".to_string()),
        ]);
        let k8s = resource_map_to_k8s(&map).unwrap();
        assert_eq!(k8s["cpu"], Quantity("200m".to_string()));
        assert_eq!(k8s["memory"], Quantity("1Gi".to_string()));
    }

    #[test]
    fn test_resource_map_rejects_bad_input() {
        assert_eq!(
            resource_map_to_k8s(&ResourceMap::new()),
            Err(BuildError::EmptyResources)
        );

        let map = ResourceMap::from([(ResourceName::Cpu, "lots".to_string())]);
        assert!(matches!(
            resource_map_to_k8s(&map),
            Err(BuildError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn test_resource_name_serde() {
        let map = ResourceMap::from([(ResourceName::EphemeralStorage, "1Gi".to_string())]);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"ephemeral-storage":"1Gi"}"#);
    }

    #[test]
    fn test_resource_map_from_pairs() {
        let map = resource_map_from_pairs([("cpu", "200m"), ("memory", "1Gi")]).unwrap();
        assert_eq!(map[&ResourceName::Memory], "1Gi");

        assert_eq!(
            resource_map_from_pairs([("gpu", "1")]),
            Err(BuildError::UnknownResource {
                name: "gpu".to_string()
            })
        );
    }

    #[test]
    fn test_label_requirement_deserializes_without_values() {
        let requirement: LabelRequirement =
            serde_json::from_str(r#"{"key":"tier","operator":"Exists"}"#).unwrap();
        assert_eq!(
            requirement,
            LabelRequirement::new("tier", LabelSelectorOperator::Exists, Vec::<String>::new())
        );
        assert!(!requirement.operator.takes_values());
    }

    #[test]
    fn test_pull_policy_lenient() {
        assert_eq!(PullPolicy::parse_lenient("Always"), PullPolicy::Always);
        assert_eq!(PullPolicy::parse_lenient("bogus"), PullPolicy::IfNotPresent);
    }
}
