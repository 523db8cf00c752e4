//! Error taxonomy for workload building
//!
//! Structural errors are raised as soon as the offending call is made (or at
//! `finish` when they depend on the assembled object). Tier-policy errors are
//! only raised at `finish`, after every structural check has passed.

use crate::qos::QosClass;
use thiserror::Error;

/// Errors recorded by a [`WorkloadBuilder`](crate::builder::WorkloadBuilder)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{kind} name is not allowed to be empty")]
    MissingName { kind: &'static str },

    #[error("container port must satisfy 0 < port < 65536, got {port}")]
    InvalidPort { port: i32 },

    #[error("container image is not allowed to be empty")]
    EmptyImage,

    #[error("{kind}.spec.template.spec.containers is not allowed to be empty")]
    NoContainers { kind: &'static str },

    #[error("container name '{name}' is repeated")]
    DuplicateContainerName { name: String },

    #[error("container name is required when a pod has more than one container")]
    UnnamedContainer,

    #[error("{field} is not allowed to be empty")]
    EmptyLabels { field: &'static str },

    #[error("{kind} pod labels are not allowed to be empty, call set_pod_labels")]
    MissingPodLabels { kind: &'static str },

    #[error("{kind} selector does not match the pod template labels")]
    SelectorMismatch { kind: &'static str },

    #[error("environment map is not allowed to be empty")]
    EmptyEnvs,

    #[error("environment key or value is not allowed to be empty ({key}:{value})")]
    InvalidEnv { key: String, value: String },

    #[error("resource map is not allowed to be empty")]
    EmptyResources,

    #[error("resource name '{name}' is not supported")]
    UnknownResource { name: String },

    #[error("invalid quantity '{value}' for resource {resource}")]
    InvalidQuantity { resource: String, value: String },

    #[error("{field} is not allowed to be empty")]
    EmptyField { field: &'static str },

    #[error("requirement on key '{key}' is invalid: {reason}")]
    InvalidRequirement { key: String, reason: &'static str },

    #[error("preferred node affinity weight must be in 1..=100, got {weight}")]
    InvalidWeight { weight: i32 },

    #[error("unknown QoS class '{value}', expected Guaranteed, Burstable or BestEffort")]
    UnknownQosClass { value: String },

    #[error("qos check failed, desired {desired} but workload is {actual}, notice: {notice}")]
    QosMismatch {
        desired: QosClass,
        actual: QosClass,
        notice: &'static str,
    },

    #[error("set QoS class {target} failed, defaults are missing: call {missing}")]
    RegistryIncomplete {
        target: QosClass,
        missing: &'static str,
    },

    #[error("set QoS class {target} failed, default limits and requests differ, notice: {notice}")]
    RegistryInconsistent {
        target: QosClass,
        notice: &'static str,
    },

    #[error("cannot upgrade QoS class from {from} to {to}: {reason}")]
    UpgradeUnsupported {
        from: QosClass,
        to: QosClass,
        reason: &'static str,
    },
}

impl BuildError {
    /// Returns true for errors that come from tier policy rather than structure
    pub fn is_tier_policy(&self) -> bool {
        matches!(
            self,
            BuildError::QosMismatch { .. }
                | BuildError::RegistryIncomplete { .. }
                | BuildError::RegistryInconsistent { .. }
                | BuildError::UpgradeUnsupported { .. }
        )
    }
}

/// Errors returned when registering default resource quantities
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("default {table} must include cpu and memory and only include cpu and memory")]
    InvalidKeys { table: &'static str },

    #[error("default {table} value for {resource} is not allowed to be empty")]
    EmptyValue {
        table: &'static str,
        resource: &'static str,
    },
}

/// Errors returned by [`WorkloadBuilder::release`](crate::builder::WorkloadBuilder::release)
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("failed to submit {kind} {namespace}/{name}")]
    Submit {
        kind: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}
