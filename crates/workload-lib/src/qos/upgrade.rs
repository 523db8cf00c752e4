//! QoS auto-upgrade from registered defaults

use super::QosClass;
use crate::error::BuildError;
use crate::models::{ResourceMap, ResourceName};
use crate::registry::DefaultsSnapshot;
use k8s_openapi::api::core::v1::{Container, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use tracing::debug;

/// Raise a pod from `actual` to `desired` by overwriting container resources
/// with registry defaults.
///
/// Never downgrades: when `actual` already ranks at or above `desired` the
/// containers are left untouched. Only `BestEffort` pods can be upgraded.
pub fn upgrade(
    desired: QosClass,
    actual: QosClass,
    containers: &mut [Container],
    defaults: &DefaultsSnapshot,
) -> Result<(), BuildError> {
    if actual.rank() >= desired.rank() {
        return Ok(());
    }

    match (actual, desired) {
        (QosClass::BestEffort, QosClass::Guaranteed) => {
            let missing = match (is_complete(&defaults.limits), is_complete(&defaults.requests)) {
                (true, true) => None,
                (false, true) => Some("register_default_limit"),
                (true, false) => Some("register_default_request"),
                (false, false) => Some("register_default_limit and register_default_request"),
            };
            if let Some(missing) = missing {
                return Err(BuildError::RegistryIncomplete {
                    target: desired,
                    missing,
                });
            }
            if defaults.limits != defaults.requests {
                return Err(BuildError::RegistryInconsistent {
                    target: desired,
                    notice: desired.notice(),
                });
            }

            let quantities = to_quantities(&defaults.requests);
            for container in containers.iter_mut() {
                let resources = container
                    .resources
                    .get_or_insert_with(ResourceRequirements::default);
                resources.limits = Some(quantities.clone());
                resources.requests = Some(quantities.clone());
            }
        }
        (QosClass::BestEffort, QosClass::Burstable) => {
            if defaults.requests.is_empty() {
                return Err(BuildError::RegistryIncomplete {
                    target: desired,
                    missing: "register_default_request",
                });
            }

            let quantities = to_quantities(&defaults.requests);
            for container in containers.iter_mut() {
                container
                    .resources
                    .get_or_insert_with(ResourceRequirements::default)
                    .requests = Some(quantities.clone());
            }
        }
        (from, to) => {
            return Err(BuildError::UpgradeUnsupported {
                from,
                to,
                reason: "every container must already declare equal cpu and memory requests and limits",
            });
        }
    }

    debug!(
        event = "qos_upgraded",
        from = %actual,
        to = %desired,
        containers = containers.len(),
        "Applied default resources to reach QoS class"
    );
    Ok(())
}

fn is_complete(table: &ResourceMap) -> bool {
    table.len() == 2
        && table.contains_key(&ResourceName::Cpu)
        && table.contains_key(&ResourceName::Memory)
}

fn to_quantities(table: &ResourceMap) -> BTreeMap<String, Quantity> {
    table
        .iter()
        .map(|(name, value)| (name.to_string(), Quantity(value.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::classify;

    fn table(cpu: &str, memory: &str) -> ResourceMap {
        ResourceMap::from([
            (ResourceName::Cpu, cpu.to_string()),
            (ResourceName::Memory, memory.to_string()),
        ])
    }

    fn bare(name: &str) -> Container {
        Container {
            name: name.to_string(),
            image: Some("busybox".to_string()),
            ..Default::default()
        }
    }

    fn quantities(cpu: &str, memory: &str) -> Option<BTreeMap<String, Quantity>> {
        Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ]))
    }

    #[test]
    fn test_guaranteed_requires_registration() {
        let mut containers = vec![bare("a")];
        let err = upgrade(
            QosClass::Guaranteed,
            QosClass::BestEffort,
            &mut containers,
            &DefaultsSnapshot::default(),
        )
        .unwrap_err();

        assert_eq!(
            err,
            BuildError::RegistryIncomplete {
                target: QosClass::Guaranteed,
                missing: "register_default_limit and register_default_request",
            }
        );
        assert!(containers[0].resources.is_none());
    }

    #[test]
    fn test_guaranteed_names_the_missing_table() {
        let defaults = DefaultsSnapshot {
            limits: table("200m", "5G"),
            requests: ResourceMap::new(),
        };
        let err = upgrade(
            QosClass::Guaranteed,
            QosClass::BestEffort,
            &mut [bare("a")],
            &defaults,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            BuildError::RegistryIncomplete {
                missing: "register_default_request",
                ..
            }
        ));
    }

    #[test]
    fn test_guaranteed_requires_equal_tables() {
        let defaults = DefaultsSnapshot {
            limits: table("500m", "5G"),
            requests: table("200m", "5G"),
        };
        let err = upgrade(
            QosClass::Guaranteed,
            QosClass::BestEffort,
            &mut [bare("a")],
            &defaults,
        )
        .unwrap_err();

        assert!(matches!(err, BuildError::RegistryInconsistent { .. }));
    }

    #[test]
    fn test_guaranteed_overwrites_every_container() {
        let defaults = DefaultsSnapshot {
            limits: table("200m", "5G"),
            requests: table("200m", "5G"),
        };
        let mut containers = vec![bare("a"), bare("b")];

        upgrade(
            QosClass::Guaranteed,
            QosClass::BestEffort,
            &mut containers,
            &defaults,
        )
        .unwrap();

        for container in &containers {
            let resources = container.resources.as_ref().unwrap();
            assert_eq!(resources.limits, quantities("200m", "5G"));
            assert_eq!(resources.requests, quantities("200m", "5G"));
        }
        assert_eq!(classify(&containers), QosClass::Guaranteed);
    }

    #[test]
    fn test_burstable_sets_requests_only() {
        let defaults = DefaultsSnapshot {
            limits: ResourceMap::new(),
            requests: table("100m", "128Mi"),
        };
        let mut containers = vec![bare("a")];

        upgrade(
            QosClass::Burstable,
            QosClass::BestEffort,
            &mut containers,
            &defaults,
        )
        .unwrap();

        let resources = containers[0].resources.as_ref().unwrap();
        assert_eq!(resources.requests, quantities("100m", "128Mi"));
        assert!(resources.limits.is_none());
        assert_eq!(classify(&containers), QosClass::Burstable);
    }

    #[test]
    fn test_burstable_requires_request_table() {
        let err = upgrade(
            QosClass::Burstable,
            QosClass::BestEffort,
            &mut [bare("a")],
            &DefaultsSnapshot::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            BuildError::RegistryIncomplete {
                target: QosClass::Burstable,
                missing: "register_default_request",
            }
        ));
    }

    #[test]
    fn test_never_downgrades() {
        let mut containers = vec![Container {
            resources: Some(ResourceRequirements {
                limits: quantities("1", "1Gi"),
                requests: quantities("1", "1Gi"),
                ..Default::default()
            }),
            ..bare("a")
        }];
        let before = containers.clone();

        for desired in [QosClass::BestEffort, QosClass::Burstable, QosClass::Guaranteed] {
            upgrade(
                desired,
                QosClass::Guaranteed,
                &mut containers,
                &DefaultsSnapshot::default(),
            )
            .unwrap();
        }
        assert_eq!(containers, before);
    }

    #[test]
    fn test_burstable_to_guaranteed_is_unsupported() {
        let defaults = DefaultsSnapshot {
            limits: table("200m", "5G"),
            requests: table("200m", "5G"),
        };
        let err = upgrade(
            QosClass::Guaranteed,
            QosClass::Burstable,
            &mut [bare("a")],
            &defaults,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            BuildError::UpgradeUnsupported {
                from: QosClass::Burstable,
                to: QosClass::Guaranteed,
                ..
            }
        ));
    }
}
