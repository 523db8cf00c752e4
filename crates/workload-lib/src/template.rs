//! Pod template field setters
//!
//! Each setter works on a `PodTemplateSpec`. Setters that need a container
//! and find none create a placeholder container without an image; a later
//! `set_container` call fills the placeholder in. Scheduling setters (node
//! affinity, tolerations) work on the pod spec, and `set_match_expressions`
//! on the workload selector.

use crate::error::BuildError;
use crate::models::{
    resource_map_to_k8s, LabelRequirement, NodeSelectorOperator, ProbeTiming, ResourceMap,
    TaintEffect, TolerationOperator, UriScheme,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, HTTPGetAction, HTTPHeader, Lifecycle,
    LifecycleHandler, LocalObjectReference, NodeAffinity, NodeSelectorRequirement,
    NodeSelectorTerm, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    PreferredSchedulingTerm, Probe, ResourceRequirements, TCPSocketAction, Toleration, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::{BTreeMap, HashSet};

/// Initial probe delay used when the caller passes a non-positive value
pub const DEFAULT_PROBE_DELAY_SECS: i32 = 30;

/// The pod spec of a template, created on first use
pub fn pod_spec_mut(template: &mut PodTemplateSpec) -> &mut PodSpec {
    template.spec.get_or_insert_with(PodSpec::default)
}

/// Containers of a template, empty if the template has no spec yet
pub fn containers(template: &PodTemplateSpec) -> &[Container] {
    template
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or(&[])
}

/// Containers of a template, creating the spec on first use
pub fn containers_mut(template: &mut PodTemplateSpec) -> &mut Vec<Container> {
    &mut pod_spec_mut(template).containers
}

/// The first container, creating a placeholder when there is none
fn first_container(template: &mut PodTemplateSpec) -> &mut Container {
    let containers = containers_mut(template);
    if containers.is_empty() {
        containers.push(Container::default());
    }
    &mut containers[0]
}

/// Add or fill a container
///
/// The first container without an image is overwritten; when every container
/// already has an image, a new one is appended.
pub fn set_container(
    template: &mut PodTemplateSpec,
    name: &str,
    image: &str,
    port: i32,
) -> Result<(), BuildError> {
    if port <= 0 || port >= 65536 {
        return Err(BuildError::InvalidPort { port });
    }
    if image.trim().is_empty() {
        return Err(BuildError::EmptyImage);
    }

    let ports = vec![ContainerPort {
        container_port: port,
        ..Default::default()
    }];
    let containers = containers_mut(template);

    let unfilled = containers.iter_mut().find(|c| {
        c.image
            .as_deref()
            .map(|image| image.trim().is_empty())
            .unwrap_or(true)
    });
    match unfilled {
        Some(container) => {
            container.name = name.to_string();
            container.image = Some(image.to_string());
            container.ports = Some(ports);
        }
        None => containers.push(Container {
            name: name.to_string(),
            image: Some(image.to_string()),
            ports: Some(ports),
            ..Default::default()
        }),
    }
    Ok(())
}

/// Append a fully formed container
pub fn set_container_one(template: &mut PodTemplateSpec, container: Container) {
    containers_mut(template).push(container);
}

/// Set limits on every container that has none yet
pub fn set_resource_limit(
    template: &mut PodTemplateSpec,
    limits: &ResourceMap,
) -> Result<(), BuildError> {
    let data = resource_map_to_k8s(limits)?;
    fill_resources(template, |resources| {
        if resources.limits.is_none() {
            resources.limits = Some(data.clone());
        }
    });
    Ok(())
}

/// Set requests on every container that has none yet
pub fn set_resource_requests(
    template: &mut PodTemplateSpec,
    requests: &ResourceMap,
) -> Result<(), BuildError> {
    let data = resource_map_to_k8s(requests)?;
    fill_resources(template, |resources| {
        if resources.requests.is_none() {
            resources.requests = Some(data.clone());
        }
    });
    Ok(())
}

fn fill_resources(template: &mut PodTemplateSpec, mut apply: impl FnMut(&mut ResourceRequirements)) {
    let containers = containers_mut(template);
    if containers.is_empty() {
        containers.push(Container::default());
    }
    for container in containers.iter_mut() {
        apply(
            container
                .resources
                .get_or_insert_with(ResourceRequirements::default),
        );
    }
}

/// Convert key/value pairs into environment variables, trimming both sides
pub fn to_env_vars<I, K, V>(envs: I) -> Result<Vec<EnvVar>, BuildError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let vars = envs
        .into_iter()
        .map(|(key, value)| {
            let (key, value) = (key.as_ref().trim(), value.as_ref().trim());
            if key.is_empty() || value.is_empty() {
                return Err(BuildError::InvalidEnv {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
            Ok(EnvVar {
                name: key.to_string(),
                value: Some(value.to_string()),
                ..Default::default()
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if vars.is_empty() {
        return Err(BuildError::EmptyEnvs);
    }
    Ok(vars)
}

/// Set environment variables on every container that has none yet
pub fn set_envs<I, K, V>(template: &mut PodTemplateSpec, envs: I) -> Result<(), BuildError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let vars = to_env_vars(envs)?;
    let containers = containers_mut(template);
    if containers.is_empty() {
        containers.push(Container::default());
    }
    for container in containers.iter_mut().filter(|c| c.env.is_none()) {
        container.env = Some(vars.clone());
    }
    Ok(())
}

fn headers(headers: &BTreeMap<String, String>) -> Option<Vec<HTTPHeader>> {
    if headers.is_empty() {
        return None;
    }
    Some(
        headers
            .iter()
            .map(|(name, value)| HTTPHeader {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
    )
}

fn timed(probe: Probe, timing: ProbeTiming) -> Probe {
    let initial_delay = if timing.initial_delay_secs <= 0 {
        DEFAULT_PROBE_DELAY_SECS
    } else {
        timing.initial_delay_secs
    };
    Probe {
        initial_delay_seconds: Some(initial_delay),
        timeout_seconds: Some(timing.timeout_secs),
        period_seconds: Some(timing.period_secs),
        ..probe
    }
}

/// HTTP GET probe against `port` and `path`
pub fn http_probe(
    port: i32,
    path: &str,
    timing: ProbeTiming,
    http_headers: &BTreeMap<String, String>,
) -> Probe {
    timed(
        Probe {
            http_get: Some(HTTPGetAction {
                path: Some(path.to_string()),
                port: IntOrString::Int(port),
                http_headers: headers(http_headers),
                ..Default::default()
            }),
            ..Default::default()
        },
        timing,
    )
}

/// Probe that runs a command inside the container
pub fn cmd_probe(command: &[String], timing: ProbeTiming) -> Probe {
    timed(
        Probe {
            exec: Some(ExecAction {
                command: Some(command.to_vec()),
            }),
            ..Default::default()
        },
        timing,
    )
}

/// TCP socket probe; an empty host means the pod IP
pub fn tcp_probe(host: &str, port: i32, timing: ProbeTiming) -> Probe {
    timed(
        Probe {
            tcp_socket: Some(TCPSocketAction {
                host: (!host.is_empty()).then(|| host.to_string()),
                port: IntOrString::Int(port),
            }),
            ..Default::default()
        },
        timing,
    )
}

/// Liveness probe on the first container only
pub fn set_liveness(template: &mut PodTemplateSpec, probe: Probe) {
    first_container(template).liveness_probe = Some(probe);
}

/// Readiness probe on the first container only
pub fn set_readiness(template: &mut PodTemplateSpec, probe: Probe) {
    first_container(template).readiness_probe = Some(probe);
}

pub fn exec_handler(command: &[String]) -> LifecycleHandler {
    LifecycleHandler {
        exec: Some(ExecAction {
            command: Some(command.to_vec()),
        }),
        ..Default::default()
    }
}

pub fn http_handler(
    scheme: UriScheme,
    host: &str,
    port: i32,
    path: &str,
    http_headers: &BTreeMap<String, String>,
) -> LifecycleHandler {
    LifecycleHandler {
        http_get: Some(HTTPGetAction {
            scheme: Some(scheme.as_str().to_string()),
            host: (!host.is_empty()).then(|| host.to_string()),
            port: IntOrString::Int(port),
            path: Some(path.to_string()),
            http_headers: headers(http_headers),
        }),
        ..Default::default()
    }
}

/// Hook run immediately before the first container is terminated
pub fn set_pre_stop(template: &mut PodTemplateSpec, handler: LifecycleHandler) {
    first_container(template)
        .lifecycle
        .get_or_insert_with(Lifecycle::default)
        .pre_stop = Some(handler);
}

/// Hook run immediately after the first container is created
pub fn set_post_start(template: &mut PodTemplateSpec, handler: LifecycleHandler) {
    first_container(template)
        .lifecycle
        .get_or_insert_with(Lifecycle::default)
        .post_start = Some(handler);
}

/// Declare a volume backed by a PersistentVolumeClaim
pub fn set_pv_claim(
    template: &mut PodTemplateSpec,
    volume_name: &str,
    claim_name: &str,
) -> Result<(), BuildError> {
    if volume_name.trim().is_empty() {
        return Err(BuildError::EmptyField {
            field: "volume name",
        });
    }
    if claim_name.trim().is_empty() {
        return Err(BuildError::EmptyField {
            field: "claim name",
        });
    }

    pod_spec_mut(template)
        .volumes
        .get_or_insert_with(Vec::new)
        .push(Volume {
            name: volume_name.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name.to_string(),
                read_only: Some(false),
            }),
            ..Default::default()
        });
    Ok(())
}

/// Mount a declared volume into the first container
pub fn set_pvc_mounts(
    template: &mut PodTemplateSpec,
    volume_name: &str,
    mount_path: &str,
) -> Result<(), BuildError> {
    if volume_name.trim().is_empty() {
        return Err(BuildError::EmptyField {
            field: "volume name",
        });
    }
    if mount_path.trim().is_empty() {
        return Err(BuildError::EmptyField {
            field: "mount path",
        });
    }

    first_container(template)
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: volume_name.to_string(),
            mount_path: mount_path.to_string(),
            ..Default::default()
        });
    Ok(())
}

pub fn set_image_pull_secrets(template: &mut PodTemplateSpec, secret_name: &str) {
    pod_spec_mut(template)
        .image_pull_secrets
        .get_or_insert_with(Vec::new)
        .push(LocalObjectReference {
            name: Some(secret_name.to_string()),
        });
}

pub fn set_priority_class(
    template: &mut PodTemplateSpec,
    priority_class_name: &str,
) -> Result<(), BuildError> {
    if priority_class_name.trim().is_empty() {
        return Err(BuildError::EmptyField {
            field: "priority class name",
        });
    }
    pod_spec_mut(template).priority_class_name = Some(priority_class_name.to_string());
    Ok(())
}

/// Build a node affinity requirement, checking its values against the operator
pub fn node_requirement(
    key: &str,
    values: &[String],
    operator: NodeSelectorOperator,
) -> Result<NodeSelectorRequirement, BuildError> {
    let invalid = |reason: &'static str| BuildError::InvalidRequirement {
        key: key.to_string(),
        reason,
    };
    if key.trim().is_empty() {
        return Err(invalid("key is empty"));
    }
    match operator {
        NodeSelectorOperator::In | NodeSelectorOperator::NotIn if values.is_empty() => {
            return Err(invalid("In and NotIn need at least one value"));
        }
        NodeSelectorOperator::Exists | NodeSelectorOperator::DoesNotExist if !values.is_empty() => {
            return Err(invalid("Exists and DoesNotExist take no values"));
        }
        NodeSelectorOperator::Gt | NodeSelectorOperator::Lt
            if values.len() != 1 || values[0].trim().parse::<i64>().is_err() =>
        {
            return Err(invalid("Gt and Lt take exactly one integer value"));
        }
        _ => {}
    }

    Ok(NodeSelectorRequirement {
        key: key.to_string(),
        operator: operator.as_str().to_string(),
        values: (!values.is_empty()).then(|| values.to_vec()),
    })
}

fn node_affinity_mut(template: &mut PodTemplateSpec) -> &mut NodeAffinity {
    pod_spec_mut(template)
        .affinity
        .get_or_insert_with(Default::default)
        .node_affinity
        .get_or_insert_with(Default::default)
}

fn required_terms_mut(template: &mut PodTemplateSpec) -> &mut Vec<NodeSelectorTerm> {
    &mut node_affinity_mut(template)
        .required_during_scheduling_ignored_during_execution
        .get_or_insert_with(Default::default)
        .node_selector_terms
}

/// Add a required node selector term; terms are ORed by the scheduler
pub fn set_required_or_node_affinity(template: &mut PodTemplateSpec, requirement: NodeSelectorRequirement) {
    required_terms_mut(template).push(NodeSelectorTerm {
        match_expressions: Some(vec![requirement]),
        match_fields: None,
    });
}

/// AND a requirement into every required node selector term
pub fn set_required_and_node_affinity(template: &mut PodTemplateSpec, requirement: NodeSelectorRequirement) {
    let terms = required_terms_mut(template);
    if terms.is_empty() {
        terms.push(NodeSelectorTerm::default());
    }
    for term in terms.iter_mut() {
        term.match_expressions
            .get_or_insert_with(Vec::new)
            .push(requirement.clone());
    }
}

pub fn set_preferred_node_affinity(
    template: &mut PodTemplateSpec,
    weight: i32,
    requirement: NodeSelectorRequirement,
) -> Result<(), BuildError> {
    if !(1..=100).contains(&weight) {
        return Err(BuildError::InvalidWeight { weight });
    }
    node_affinity_mut(template)
        .preferred_during_scheduling_ignored_during_execution
        .get_or_insert_with(Vec::new)
        .push(PreferredSchedulingTerm {
            preference: NodeSelectorTerm {
                match_expressions: Some(vec![requirement]),
                match_fields: None,
            },
            weight,
        });
    Ok(())
}

/// Drop requirements on `keys`, returning whether the term still selects anything
fn strip_keys(term: &mut NodeSelectorTerm, keys: &[String]) -> bool {
    for requirements in [&mut term.match_expressions, &mut term.match_fields] {
        let emptied = match requirements.as_mut() {
            Some(list) => {
                list.retain(|r| !keys.contains(&r.key));
                list.is_empty()
            }
            None => false,
        };
        if emptied {
            *requirements = None;
        }
    }
    term.match_expressions.is_some() || term.match_fields.is_some()
}

/// Remove node affinity requirements on `keys`
///
/// Terms left without requirements are removed, and so is an affinity left
/// with nothing in it.
pub fn del_node_affinity(template: &mut PodTemplateSpec, keys: &[String]) {
    let spec = pod_spec_mut(template);
    let Some(affinity) = spec.affinity.as_mut() else {
        return;
    };

    if let Some(node) = affinity.node_affinity.as_mut() {
        if let Some(required) = node.required_during_scheduling_ignored_during_execution.as_mut() {
            required.node_selector_terms.retain_mut(|term| strip_keys(term, keys));
            if required.node_selector_terms.is_empty() {
                node.required_during_scheduling_ignored_during_execution = None;
            }
        }
        if let Some(preferred) = node.preferred_during_scheduling_ignored_during_execution.as_mut() {
            preferred.retain_mut(|term| strip_keys(&mut term.preference, keys));
            if preferred.is_empty() {
                node.preferred_during_scheduling_ignored_during_execution = None;
            }
        }
        if node.required_during_scheduling_ignored_during_execution.is_none()
            && node.preferred_during_scheduling_ignored_during_execution.is_none()
        {
            affinity.node_affinity = None;
        }
    }

    if affinity.node_affinity.is_none()
        && affinity.pod_affinity.is_none()
        && affinity.pod_anti_affinity.is_none()
    {
        spec.affinity = None;
    }
}

/// Add a toleration, replacing one with the same key and effect
///
/// `Exists` drops the value. A `NoExecute` toleration always carries
/// `tolerationSeconds`, and a missing or non-positive delay becomes 0.
pub fn set_toleration(
    template: &mut PodTemplateSpec,
    key: &str,
    value: &str,
    operator: TolerationOperator,
    effect: Option<TaintEffect>,
    delay_secs: Option<i64>,
) -> Result<(), BuildError> {
    if key.trim().is_empty() && operator == TolerationOperator::Equal {
        return Err(BuildError::InvalidRequirement {
            key: key.to_string(),
            reason: "a toleration without a key must use Exists",
        });
    }

    let toleration = Toleration {
        key: (!key.trim().is_empty()).then(|| key.to_string()),
        operator: Some(operator.as_str().to_string()),
        value: match operator {
            TolerationOperator::Equal => Some(value.to_string()),
            TolerationOperator::Exists => None,
        },
        effect: effect.map(|e| e.as_str().to_string()),
        toleration_seconds: (effect == Some(TaintEffect::NoExecute))
            .then(|| delay_secs.unwrap_or(0).max(0)),
    };

    let tolerations = pod_spec_mut(template).tolerations.get_or_insert_with(Vec::new);
    match tolerations
        .iter()
        .position(|t| t.key == toleration.key && t.effect == toleration.effect)
    {
        Some(index) => tolerations[index] = toleration,
        None => tolerations.push(toleration),
    }
    Ok(())
}

/// Replace the selector's `matchExpressions`; an empty list leaves it alone
pub fn set_match_expressions(
    selector: &mut LabelSelector,
    requirements: &[LabelRequirement],
) -> Result<(), BuildError> {
    if requirements.is_empty() {
        return Ok(());
    }

    let expressions = requirements
        .iter()
        .map(|requirement| {
            let invalid = |reason: &'static str| BuildError::InvalidRequirement {
                key: requirement.key.clone(),
                reason,
            };
            if requirement.key.trim().is_empty() {
                return Err(invalid("key is empty"));
            }
            match (requirement.operator.takes_values(), requirement.values.is_empty()) {
                (true, true) => return Err(invalid("In and NotIn need at least one value")),
                (false, false) => return Err(invalid("Exists and DoesNotExist take no values")),
                _ => {}
            }
            Ok(LabelSelectorRequirement {
                key: requirement.key.clone(),
                operator: requirement.operator.as_str().to_string(),
                values: (!requirement.values.is_empty()).then(|| requirement.values.clone()),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    selector.match_expressions = Some(expressions);
    Ok(())
}

/// Every container needs an image, and with more than one container each
/// needs a distinct, non-empty name.
pub fn verify_containers(containers: &[Container]) -> Result<(), BuildError> {
    if containers.iter().any(|c| {
        c.image
            .as_deref()
            .map(|image| image.trim().is_empty())
            .unwrap_or(true)
    }) {
        return Err(BuildError::EmptyImage);
    }

    if containers.len() < 2 {
        return Ok(());
    }

    let mut seen = HashSet::new();
    for container in containers {
        if container.name.trim().is_empty() {
            return Err(BuildError::UnnamedContainer);
        }
        if !seen.insert(container.name.as_str()) {
            return Err(BuildError::DuplicateContainerName {
                name: container.name.clone(),
            });
        }
    }
    Ok(())
}
