//! Workload builder library
//!
//! This crate provides the core functionality for:
//! - Assembling Deployments, StatefulSets and DaemonSets with chained setters
//! - Classifying pods into QoS classes
//! - Upgrading BestEffort pods from registered resource defaults
//! - Parsing resource quantities
//! - Structured logging of build events

pub mod builder;
pub mod error;
pub mod models;
pub mod observability;
pub mod qos;
pub mod quantity;
pub mod registry;
pub mod submit;
pub mod template;

pub use builder::{
    DaemonSetBuilder, DeploymentBuilder, StatefulSetBuilder, Workload, WorkloadBuilder,
};
pub use error::{BuildError, RegistryError, ReleaseError};
pub use models::*;
pub use observability::StructuredLogger;
pub use qos::{classify, QosClass};
pub use quantity::{ParsedQuantity, QuantityError};
pub use registry::{DefaultsSnapshot, ResourceDefaults};
pub use submit::{RecordingSubmitter, Submitter};
