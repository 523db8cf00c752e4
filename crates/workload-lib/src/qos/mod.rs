//! Pod quality-of-service classification
//!
//! A pod is `BestEffort` if none of its containers set any cpu or memory
//! request or limit. It is `Guaranteed` only when every container sets both a
//! cpu and a memory limit and the summed requests equal the summed limits for
//! every resource. Everything else is `Burstable`.

mod upgrade;

pub use upgrade::upgrade;

use crate::error::BuildError;
use crate::models::ResourceName;
use crate::quantity::ParsedQuantity;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// QoS class of a pod, ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QosClass {
    BestEffort,
    Burstable,
    Guaranteed,
}

impl QosClass {
    /// The higher the number, the higher the class
    pub fn rank(&self) -> u8 {
        match self {
            QosClass::BestEffort => 0,
            QosClass::Burstable => 1,
            QosClass::Guaranteed => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QosClass::BestEffort => "BestEffort",
            QosClass::Burstable => "Burstable",
            QosClass::Guaranteed => "Guaranteed",
        }
    }

    /// What a workload must declare to land in this class
    pub fn notice(&self) -> &'static str {
        match self {
            QosClass::Guaranteed => "every container in the pod must have a memory limit and a memory request, and they must be the same; every container in the pod must have a CPU limit and a CPU request, and they must be the same; more information: https://kubernetes.io/docs/tasks/configure-pod-container/quality-service-pod",
            QosClass::Burstable => "the pod does not meet the criteria for QoS class Guaranteed and at least one container in the pod has a memory or CPU request; more information: https://kubernetes.io/docs/tasks/configure-pod-container/quality-service-pod",
            QosClass::BestEffort => "the containers in the pod must not have any memory or CPU limits or requests; more information: https://kubernetes.io/docs/tasks/configure-pod-container/quality-service-pod",
        }
    }
}

impl fmt::Display for QosClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QosClass {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "BestEffort" => Ok(QosClass::BestEffort),
            "Burstable" => Ok(QosClass::Burstable),
            "Guaranteed" => Ok(QosClass::Guaranteed),
            other => Err(BuildError::UnknownQosClass {
                value: other.to_string(),
            }),
        }
    }
}

/// Compute the QoS class of a pod from its containers
pub fn classify(containers: &[Container]) -> QosClass {
    let mut requests: BTreeMap<ResourceName, ParsedQuantity> = BTreeMap::new();
    let mut limits: BTreeMap<ResourceName, ParsedQuantity> = BTreeMap::new();
    let mut is_guaranteed = true;

    for container in containers {
        let resources = container.resources.as_ref();

        for (name, quantity) in positive_compute(resources.and_then(|r| r.requests.as_ref())) {
            let total = requests.entry(name).or_default();
            *total = *total + quantity;
        }

        let mut limits_found = BTreeSet::new();
        for (name, quantity) in positive_compute(resources.and_then(|r| r.limits.as_ref())) {
            limits_found.insert(name);
            let total = limits.entry(name).or_default();
            *total = *total + quantity;
        }

        if !(limits_found.contains(&ResourceName::Cpu)
            && limits_found.contains(&ResourceName::Memory))
        {
            is_guaranteed = false;
        }
    }

    if requests.is_empty() && limits.is_empty() {
        return QosClass::BestEffort;
    }

    if is_guaranteed {
        is_guaranteed = requests
            .iter()
            .all(|(name, request)| limits.get(name) == Some(request));
    }

    if is_guaranteed && requests.len() == limits.len() {
        QosClass::Guaranteed
    } else {
        QosClass::Burstable
    }
}

/// Check a pod against its desired QoS class
///
/// `BestEffort` or no desired class always passes without classifying. A
/// mismatch is reported as [`BuildError::QosMismatch`], which carries the
/// actual class for a follow-up [`upgrade`].
pub fn check(desired: Option<QosClass>, containers: &[Container]) -> Result<QosClass, BuildError> {
    let desired = match desired {
        None | Some(QosClass::BestEffort) => return Ok(QosClass::BestEffort),
        Some(desired) => desired,
    };

    let actual = classify(containers);
    if actual == desired {
        Ok(actual)
    } else {
        Err(BuildError::QosMismatch {
            desired,
            actual,
            notice: desired.notice(),
        })
    }
}

/// cpu and memory entries with a parseable quantity greater than zero
fn positive_compute(
    map: Option<&BTreeMap<String, Quantity>>,
) -> impl Iterator<Item = (ResourceName, ParsedQuantity)> + '_ {
    map.into_iter().flatten().filter_map(|(name, quantity)| {
        let name = name.parse::<ResourceName>().ok()?;
        if !name.is_qos_compute() {
            return None;
        }
        let quantity = ParsedQuantity::from_k8s(quantity).ok()?;
        quantity.is_positive().then_some((name, quantity))
    })
}
