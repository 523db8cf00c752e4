//! Builder tests
//!
//! Each test drives a builder through the public setters and checks the
//! finished object or the first recorded error.

use super::*;
use crate::models::{LabelSelectorOperator, ResourceName};
use crate::submit::RecordingSubmitter;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

fn defaults(limits: &[(&str, &str)], requests: &[(&str, &str)]) -> Arc<ResourceDefaults> {
    let registry = ResourceDefaults::new();
    if !limits.is_empty() {
        registry.register_default_limit(table(limits)).unwrap();
    }
    if !requests.is_empty() {
        registry.register_default_request(table(requests)).unwrap();
    }
    Arc::new(registry)
}

fn table(pairs: &[(&str, &str)]) -> ResourceMap {
    pairs
        .iter()
        .map(|(k, v)| (k.parse::<ResourceName>().unwrap(), v.to_string()))
        .collect()
}

fn web() -> DeploymentBuilder {
    DeploymentBuilder::new()
        .with_defaults(Arc::new(ResourceDefaults::new()))
        .set_namespace_and_name("shop", "web")
        .set_pod_labels([("app", "web")])
        .set_container("web", "nginx:1.25", 80)
}

fn pod_containers(deployment: &Deployment) -> &[Container] {
    template::containers(&deployment.spec.as_ref().unwrap().template)
}

#[test]
fn test_minimal_deployment() {
    let deployment = web().finish().unwrap();

    assert_eq!(deployment.metadata.name.as_deref(), Some("web"));
    assert_eq!(deployment.metadata.namespace.as_deref(), Some("shop"));
    let spec = deployment.spec.as_ref().unwrap();
    assert_eq!(
        spec.selector.match_labels,
        Some(BTreeMap::from([("app".to_string(), "web".to_string())]))
    );
    assert_eq!(
        spec.template.metadata.as_ref().unwrap().namespace.as_deref(),
        Some("shop")
    );

    let containers = pod_containers(&deployment);
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].image.as_deref(), Some("nginx:1.25"));
    assert_eq!(containers[0].image_pull_policy.as_deref(), Some("IfNotPresent"));
}

#[test]
fn test_first_error_is_sticky() {
    let mut builder = DeploymentBuilder::new()
        .set_name("web")
        .set_container("web", "nginx", 0)
        .set_container("web", "", 80)
        .set_pod_labels(Vec::<(String, String)>::new());

    assert_eq!(builder.error(), Some(&BuildError::InvalidPort { port: 0 }));
    assert_eq!(builder.finish(), Err(BuildError::InvalidPort { port: 0 }));
}

#[test]
fn test_setters_after_error_do_not_mutate() {
    let builder = DeploymentBuilder::new()
        .set_name("web")
        .set_pod_labels(Vec::<(String, String)>::new())
        .set_name("other")
        .set_container("web", "nginx", 80);

    assert_eq!(
        builder.error(),
        Some(&BuildError::EmptyLabels {
            field: "pod labels"
        })
    );
    assert_eq!(builder.object.metadata.name.as_deref(), Some("web"));
    assert!(builder.object.template().is_none());
}

#[test]
fn test_missing_name() {
    let err = DeploymentBuilder::new()
        .set_pod_labels([("app", "web")])
        .set_container("web", "nginx", 80)
        .finish()
        .unwrap_err();
    assert_eq!(err, BuildError::MissingName { kind: "Deployment" });
}

#[test]
fn test_namespace_defaults_on_finish() {
    let deployment = DeploymentBuilder::new()
        .set_name("web")
        .set_pod_labels([("app", "web")])
        .set_container("web", "nginx", 80)
        .finish()
        .unwrap();

    assert_eq!(deployment.metadata.namespace.as_deref(), Some("default"));
    let pod_meta = deployment.spec.unwrap().template.metadata.unwrap();
    assert_eq!(pod_meta.namespace.as_deref(), Some("default"));
}

#[test]
fn test_no_containers() {
    let err = DeploymentBuilder::new()
        .set_name("web")
        .set_pod_labels([("app", "web")])
        .finish()
        .unwrap_err();
    assert_eq!(err, BuildError::NoContainers { kind: "Deployment" });
}

#[test]
fn test_missing_pod_labels() {
    let err = DeploymentBuilder::new()
        .set_name("web")
        .set_container("web", "nginx", 80)
        .finish()
        .unwrap_err();
    assert_eq!(err, BuildError::MissingPodLabels { kind: "Deployment" });
}

#[test]
fn test_placeholder_container_is_filled() {
    let deployment = DeploymentBuilder::new()
        .set_name("web")
        .set_pod_labels([("app", "web")])
        .set_envs([("MODE", "prod")])
        .set_resource_limit(table(&[("cpu", "500m"), ("memory", "256Mi")]))
        .set_container("web", "nginx", 8080)
        .finish()
        .unwrap();

    let containers = pod_containers(&deployment);
    assert_eq!(containers.len(), 1);
    let container = &containers[0];
    assert_eq!(container.name, "web");
    assert_eq!(container.env.as_ref().unwrap()[0].name, "MODE");
    assert!(container
        .resources
        .as_ref()
        .and_then(|r| r.limits.as_ref())
        .is_some());
}

#[test]
fn test_set_container_overwrites_then_appends() {
    let deployment = DeploymentBuilder::new()
        .set_name("web")
        .set_pod_labels([("app", "web")])
        .set_container_one(Container::default())
        .set_container("web", "nginx", 80)
        .set_container("sidecar", "envoy", 9901)
        .finish()
        .unwrap();

    let containers = pod_containers(&deployment);
    assert_eq!(containers.len(), 2);
    assert_eq!(containers[0].name, "web");
    assert_eq!(containers[0].image.as_deref(), Some("nginx"));
    assert_eq!(containers[1].name, "sidecar");
}

#[test]
fn test_placeholder_without_image_fails() {
    let err = DeploymentBuilder::new()
        .set_name("web")
        .set_pod_labels([("app", "web")])
        .set_envs([("MODE", "prod")])
        .finish()
        .unwrap_err();
    assert_eq!(err, BuildError::EmptyImage);
}

#[test]
fn test_duplicate_container_names() {
    let err = web()
        .set_container("web", "nginx:1.26", 81)
        .finish()
        .unwrap_err();
    assert_eq!(
        err,
        BuildError::DuplicateContainerName {
            name: "web".to_string()
        }
    );
}

#[test]
fn test_selector_mismatch_after_replace() {
    let mut object = web().finish().unwrap();
    object.spec.as_mut().unwrap().selector.match_labels =
        Some(BTreeMap::from([("app".to_string(), "api".to_string())]));

    let err = DeploymentBuilder::new().replace(object).finish().unwrap_err();
    assert_eq!(err, BuildError::SelectorMismatch { kind: "Deployment" });
}

#[test]
fn test_finish_is_idempotent() {
    let mut builder = web()
        .set_resource_request(table(&[("cpu", "100m"), ("memory", "64Mi")]))
        .set_pod_qos(QosClass::Burstable, false);

    let first = builder.finish().unwrap();
    let second = builder.finish().unwrap();
    assert_eq!(first, second);

    let mut failing = DeploymentBuilder::new().set_name("web");
    let first = failing.finish().unwrap_err();
    assert_eq!(failing.finish().unwrap_err(), first);
}

#[test]
fn test_setter_after_finish_revalidates() {
    let mut builder = web();
    builder.finish().unwrap();

    let mut builder = builder.set_container("web", "redis", 6379);
    assert!(matches!(
        builder.finish(),
        Err(BuildError::DuplicateContainerName { .. })
    ));
}

#[test]
fn test_qos_mismatch_without_auto_upgrade() {
    let err = web()
        .set_pod_qos(QosClass::Guaranteed, false)
        .finish()
        .unwrap_err();

    assert!(err.is_tier_policy());
    assert!(matches!(
        err,
        BuildError::QosMismatch {
            desired: QosClass::Guaranteed,
            actual: QosClass::BestEffort,
            ..
        }
    ));
}

#[test]
fn test_best_effort_desired_skips_check() {
    let deployment = web()
        .set_resource_limit(table(&[("cpu", "1"), ("memory", "1Gi")]))
        .set_pod_qos(QosClass::BestEffort, false)
        .finish()
        .unwrap();
    assert_eq!(qos::classify(pod_containers(&deployment)), QosClass::Burstable);
}

#[test]
fn test_auto_upgrade_to_guaranteed() {
    let registry = defaults(
        &[("cpu", "200m"), ("memory", "5G")],
        &[("cpu", "200m"), ("memory", "5G")],
    );
    let deployment = web()
        .with_defaults(registry)
        .set_container("sidecar", "envoy", 9901)
        .set_pod_qos(QosClass::Guaranteed, true)
        .finish()
        .unwrap();

    let containers = pod_containers(&deployment);
    assert_eq!(containers.len(), 2);
    let expected = Some(BTreeMap::from([
        ("cpu".to_string(), Quantity("200m".to_string())),
        ("memory".to_string(), Quantity("5G".to_string())),
    ]));
    for container in containers {
        let resources = container.resources.as_ref().unwrap();
        assert_eq!(resources.limits, expected);
        assert_eq!(resources.requests, expected);
    }
    assert_eq!(qos::classify(containers), QosClass::Guaranteed);
}

#[test]
fn test_auto_upgrade_without_registry_fails() {
    let err = web()
        .set_pod_qos(QosClass::Guaranteed, true)
        .finish()
        .unwrap_err();
    assert!(matches!(err, BuildError::RegistryIncomplete { .. }));
}

#[test]
fn test_auto_upgrade_to_burstable() {
    let registry = defaults(&[], &[("cpu", "100m"), ("memory", "128Mi")]);
    let deployment = web()
        .with_defaults(registry)
        .set_pod_qos(QosClass::Burstable, true)
        .finish()
        .unwrap();

    let resources = pod_containers(&deployment)[0].resources.as_ref().unwrap();
    assert!(resources.limits.is_none());
    assert_eq!(qos::classify(pod_containers(&deployment)), QosClass::Burstable);
}

#[test]
fn test_auto_upgrade_never_downgrades() {
    let registry = defaults(&[], &[("cpu", "100m"), ("memory", "128Mi")]);
    let full = table(&[("cpu", "1"), ("memory", "1Gi")]);
    let deployment = web()
        .with_defaults(registry)
        .set_resource_limit(full.clone())
        .set_resource_request(full)
        .set_pod_qos(QosClass::Burstable, true)
        .finish()
        .unwrap();

    let resources = pod_containers(&deployment)[0].resources.as_ref().unwrap();
    assert_eq!(
        resources.requests.as_ref().unwrap()["cpu"],
        Quantity("1".to_string())
    );
    assert_eq!(qos::classify(pod_containers(&deployment)), QosClass::Guaranteed);
}

#[test]
fn test_burstable_to_guaranteed_is_rejected() {
    let registry = defaults(
        &[("cpu", "200m"), ("memory", "5G")],
        &[("cpu", "200m"), ("memory", "5G")],
    );
    let err = web()
        .with_defaults(registry)
        .set_resource_request(table(&[("cpu", "100m"), ("memory", "64Mi")]))
        .set_pod_qos(QosClass::Guaranteed, true)
        .finish()
        .unwrap_err();
    assert!(matches!(err, BuildError::UpgradeUnsupported { .. }));
}

#[test]
fn test_unknown_qos_annotation() {
    let err = web()
        .set_annotations([("qos", "Gold")])
        .finish()
        .unwrap_err();
    assert_eq!(
        err,
        BuildError::UnknownQosClass {
            value: "Gold".to_string()
        }
    );
}

#[test]
fn test_pull_policy_annotation_is_consumed() {
    let deployment = web()
        .set_annotations([("team", "storefront")])
        .image_pull_policy(PullPolicy::Always)
        .finish()
        .unwrap();

    assert_eq!(
        pod_containers(&deployment)[0].image_pull_policy.as_deref(),
        Some("Always")
    );
    let annotations = deployment.metadata.annotations.unwrap();
    assert!(!annotations.contains_key(IMAGE_PULL_POLICY_ANNOTATION));
    assert_eq!(annotations["team"], "storefront");
}

#[test]
fn test_pull_policy_survives_refinish() {
    let mut builder = web().image_pull_policy(PullPolicy::Always);
    let deployment = builder.finish().unwrap();
    assert_eq!(
        pod_containers(&deployment)[0].image_pull_policy.as_deref(),
        Some("Always")
    );

    let mut builder = builder
        .set_labels([("tier", "web")])
        .set_container_one(Container {
            name: "sidecar".to_string(),
            image: Some("envoy:1.28".to_string()),
            ..Default::default()
        });
    let deployment = builder.finish().unwrap();
    let containers = pod_containers(&deployment);
    assert_eq!(containers[0].image_pull_policy.as_deref(), Some("Always"));
    assert_eq!(containers[1].image_pull_policy.as_deref(), Some("Always"));
}

#[test]
fn test_explicit_container_pull_policy_is_kept() {
    let deployment = web()
        .set_container_one(Container {
            name: "sidecar".to_string(),
            image: Some("envoy:1.28".to_string()),
            image_pull_policy: Some("Never".to_string()),
            ..Default::default()
        })
        .finish()
        .unwrap();

    let containers = pod_containers(&deployment);
    assert_eq!(containers[0].image_pull_policy.as_deref(), Some("IfNotPresent"));
    assert_eq!(containers[1].image_pull_policy.as_deref(), Some("Never"));
}

#[test]
fn test_probes_and_hooks_target_first_container() {
    let command = vec!["sh".to_string(), "-c".to_string(), "nginx -s quit".to_string()];
    let deployment = web()
        .set_container("sidecar", "envoy", 9901)
        .set_http_liveness(80, "/healthz", ProbeTiming::new(0, 1, 10), &BTreeMap::new())
        .set_tcp_readiness("", 80, ProbeTiming::new(5, 1, 10))
        .set_pre_stop_exec(&command)
        .finish()
        .unwrap();

    let containers = pod_containers(&deployment);
    let liveness = containers[0].liveness_probe.as_ref().unwrap();
    assert_eq!(liveness.initial_delay_seconds, Some(template::DEFAULT_PROBE_DELAY_SECS));
    assert!(containers[0].readiness_probe.is_some());
    assert!(containers[0].lifecycle.as_ref().unwrap().pre_stop.is_some());
    assert!(containers[1].liveness_probe.is_none());
}

#[test]
fn test_node_placement_setters() {
    let deployment = web()
        .set_required_or_node_affinity("zone", ["eu-west-1a"], NodeSelectorOperator::In)
        .set_required_or_node_affinity("zone", ["eu-west-1b"], NodeSelectorOperator::In)
        .set_required_and_node_affinity("arch", ["amd64"], NodeSelectorOperator::In)
        .set_preferred_node_affinity(50, "ssd", Vec::<String>::new(), NodeSelectorOperator::Exists)
        .set_toleration("dedicated", "web", TolerationOperator::Equal, Some(TaintEffect::NoExecute), Some(120))
        .finish()
        .unwrap();

    let pod = deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
    let node = pod.affinity.as_ref().unwrap().node_affinity.as_ref().unwrap();
    let terms = &node
        .required_during_scheduling_ignored_during_execution
        .as_ref()
        .unwrap()
        .node_selector_terms;
    assert_eq!(terms.len(), 2);
    assert!(terms
        .iter()
        .all(|term| term.match_expressions.as_ref().unwrap()[1].key == "arch"));
    let preferred = node
        .preferred_during_scheduling_ignored_during_execution
        .as_ref()
        .unwrap();
    assert_eq!(preferred[0].weight, 50);

    let toleration = &pod.tolerations.as_ref().unwrap()[0];
    assert_eq!(toleration.toleration_seconds, Some(120));
    assert_eq!(toleration.value.as_deref(), Some("web"));
}

#[test]
fn test_del_node_affinity_after_finish() {
    let mut builder = web()
        .set_required_or_node_affinity("zone", ["eu-west-1a"], NodeSelectorOperator::In)
        .set_preferred_node_affinity(10, "zone", ["eu-west-1b"], NodeSelectorOperator::In);
    builder.finish().unwrap();

    let deployment = builder.del_node_affinity(["zone"]).finish().unwrap();
    let pod = deployment.spec.unwrap().template.spec.unwrap();
    assert!(pod.affinity.is_none());
}

#[test]
fn test_invalid_node_requirement_is_sticky() {
    let mut builder = web()
        .set_preferred_node_affinity(0, "zone", ["a"], NodeSelectorOperator::In)
        .set_required_or_node_affinity("zone", Vec::<String>::new(), NodeSelectorOperator::In);

    assert_eq!(builder.finish().unwrap_err(), BuildError::InvalidWeight { weight: 0 });

    let mut builder = web().set_required_and_node_affinity("cpus", ["four"], NodeSelectorOperator::Gt);
    assert!(matches!(
        builder.finish(),
        Err(BuildError::InvalidRequirement { key, .. }) if key == "cpus"
    ));
}

#[test]
fn test_exists_toleration_drops_value() {
    let deployment = web()
        .set_toleration("gpu", "nvidia", TolerationOperator::Exists, Some(TaintEffect::NoSchedule), Some(30))
        .finish()
        .unwrap();

    let pod = deployment.spec.unwrap().template.spec.unwrap();
    let toleration = &pod.tolerations.unwrap()[0];
    assert_eq!(toleration.operator.as_deref(), Some("Exists"));
    assert_eq!(toleration.value, None);
    assert_eq!(toleration.toleration_seconds, None);
}

#[test]
fn test_match_expressions_join_copied_selector() {
    let deployment = web()
        .set_match_expressions([LabelRequirement::new(
            "track",
            LabelSelectorOperator::NotIn,
            ["canary"],
        )])
        .finish()
        .unwrap();

    let selector = deployment.spec.unwrap().selector;
    assert_eq!(
        selector.match_labels,
        Some(BTreeMap::from([("app".to_string(), "web".to_string())]))
    );
    let expressions = selector.match_expressions.unwrap();
    assert_eq!(expressions[0].key, "track");
    assert_eq!(expressions[0].operator, "NotIn");

    let mut builder = web().set_match_expressions([LabelRequirement::new(
        "track",
        LabelSelectorOperator::Exists,
        ["canary"],
    )]);
    assert!(matches!(
        builder.finish(),
        Err(BuildError::InvalidRequirement { .. })
    ));
}

#[test]
fn test_named_resources_keep_first_error() {
    let mut builder = DeploymentBuilder::new()
        .with_defaults(Arc::new(ResourceDefaults::new()))
        .set_name("web")
        .set_container("web", "nginx", 0)
        .set_resource_limit_named([("gpu", "1")]);
    assert_eq!(builder.finish().unwrap_err(), BuildError::InvalidPort { port: 0 });

    let mut builder = web().set_resource_limit_named([("gpu", "1")]);
    assert_eq!(
        builder.finish().unwrap_err(),
        BuildError::UnknownResource {
            name: "gpu".to_string()
        }
    );

    let deployment = web()
        .set_resource_request_named([("cpu", "100m")])
        .finish()
        .unwrap();
    let requests = pod_containers(&deployment)[0]
        .resources
        .as_ref()
        .unwrap()
        .requests
        .as_ref()
        .unwrap();
    assert_eq!(requests["cpu"], Quantity("100m".to_string()));
}

#[test]
fn test_deployment_spec_fields_are_clamped() {
    let deployment = web()
        .set_replicas(3)
        .set_min_ready_seconds(-5)
        .set_history_limit(0)
        .set_deploy_max_time(-1)
        .finish()
        .unwrap();

    let spec = deployment.spec.unwrap();
    assert_eq!(spec.replicas, Some(3));
    assert_eq!(spec.min_ready_seconds, Some(0));
    assert_eq!(spec.revision_history_limit, Some(10));
    assert_eq!(spec.progress_deadline_seconds, Some(600));
}

#[test]
fn test_statefulset_requires_service_name() {
    let base = || {
        StatefulSetBuilder::new()
            .set_name("db")
            .set_pod_labels([("app", "db")])
            .set_container("db", "postgres:16", 5432)
            .set_pv_claim("data", "db-data")
            .set_pvc_mounts("data", "/var/lib/postgresql/data")
    };

    let err = base().finish().unwrap_err();
    assert_eq!(
        err,
        BuildError::EmptyField {
            field: "StatefulSet.spec.serviceName"
        }
    );

    let statefulset = base().set_service_name("db").set_replicas(2).finish().unwrap();
    let spec = statefulset.spec.unwrap();
    assert_eq!(spec.service_name, "db");
    assert_eq!(spec.replicas, Some(2));
    let pod = spec.template.spec.unwrap();
    assert_eq!(pod.volumes.unwrap()[0].name, "data");
}

#[test]
fn test_daemonset_builder() {
    let daemonset = DaemonSetBuilder::new()
        .set_namespace_and_name("kube-system", "node-agent")
        .set_pod_labels([("app", "node-agent")])
        .set_container("agent", "agent:1.0", 9100)
        .set_image_pull_secrets("registry-creds")
        .set_pod_priority_class("system-node-critical")
        .set_min_ready_seconds(10)
        .finish()
        .unwrap();

    let spec = daemonset.spec.unwrap();
    assert_eq!(spec.min_ready_seconds, Some(10));
    let pod = spec.template.spec.unwrap();
    assert_eq!(pod.priority_class_name.as_deref(), Some("system-node-critical"));
    assert_eq!(
        pod.image_pull_secrets.unwrap()[0].name.as_deref(),
        Some("registry-creds")
    );
}

#[test]
fn test_set_container_one_keeps_resources() {
    let container = Container {
        name: "worker".to_string(),
        image: Some("worker:2".to_string()),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([(
                "cpu".to_string(),
                Quantity("250m".to_string()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    };
    let deployment = DeploymentBuilder::new()
        .set_name("worker")
        .set_selector([("app", "worker")])
        .set_container_one(container.clone())
        .finish()
        .unwrap();

    assert_eq!(pod_containers(&deployment)[0].resources, container.resources);
}

#[test]
fn test_release_submits_finished_workload() {
    let submitter = RecordingSubmitter::new();
    let mut builder = web();

    let deployment = builder.release(&submitter).unwrap();

    let submitted = submitter.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0]["metadata"]["name"], "web");
    assert_eq!(deployment.metadata.name.as_deref(), Some("web"));
}

#[test]
fn test_release_never_submits_on_error() {
    let submitter = RecordingSubmitter::new();
    let mut builder = DeploymentBuilder::new().set_container("web", "nginx", 70000);

    let err = builder.release(&submitter).unwrap_err();

    assert!(matches!(
        err,
        ReleaseError::Build(BuildError::InvalidPort { port: 70000 })
    ));
    assert!(submitter.submitted().is_empty());
}

struct FailingSubmitter;

impl Submitter<Deployment> for FailingSubmitter {
    fn submit(&self, _workload: &Deployment) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }
}

#[test]
fn test_release_wraps_submit_errors() {
    let err = web().release(&FailingSubmitter).unwrap_err();
    match err {
        ReleaseError::Submit {
            kind,
            namespace,
            name,
            ..
        } => {
            assert_eq!(kind, "Deployment");
            assert_eq!(namespace, "shop");
            assert_eq!(name, "web");
        }
        other => panic!("expected submit error, got {other:?}"),
    }
}
