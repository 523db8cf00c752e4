//! Chained workload construction with deferred errors
//!
//! Every setter returns the builder so calls can be chained without checking
//! a result after each step. The first failing setter records its error and
//! every later setter becomes a no-op; `finish` reports that first error or,
//! when none occurred, runs final validation and returns the object.
//!
//! ```
//! use workload_lib::builder::DeploymentBuilder;
//!
//! let deployment = DeploymentBuilder::new()
//!     .set_namespace_and_name("shop", "web")
//!     .set_pod_labels([("app", "web")])
//!     .set_container("web", "nginx:1.25", 80)
//!     .finish()
//!     .unwrap();
//! assert_eq!(deployment.metadata.name.as_deref(), Some("web"));
//! ```

mod kind;

#[cfg(test)]
mod tests;

pub use kind::Workload;

use crate::error::{BuildError, ReleaseError};
use crate::models::{
    resource_map_from_pairs, LabelRequirement, NodeSelectorOperator, ProbeTiming, PullPolicy,
    ResourceMap, TaintEffect, TolerationOperator, UriScheme, AUTO_QOS_ANNOTATION,
    DEFAULT_NAMESPACE, IMAGE_PULL_POLICY_ANNOTATION, QOS_ANNOTATION,
};
use crate::qos::{self, QosClass};
use crate::registry::ResourceDefaults;
use crate::submit::Submitter;
use crate::template;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Container, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub type DeploymentBuilder = WorkloadBuilder<Deployment>;
pub type StatefulSetBuilder = WorkloadBuilder<StatefulSet>;
pub type DaemonSetBuilder = WorkloadBuilder<DaemonSet>;

/// Builder for a workload object with a sticky first error
#[derive(Debug, Clone)]
pub struct WorkloadBuilder<W: Workload> {
    object: W,
    error: Option<BuildError>,
    defaults: Arc<ResourceDefaults>,
    pull_policy: Option<PullPolicy>,
    finished: bool,
}

impl<W: Workload> Default for WorkloadBuilder<W> {
    fn default() -> Self {
        Self::new()
    }
}

fn label_map<I, K, V>(labels: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    labels
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn is_blank(value: Option<&String>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

impl<W: Workload> WorkloadBuilder<W> {
    /// Start an empty workload using the process-wide resource defaults
    pub fn new() -> Self {
        Self {
            object: W::default(),
            error: None,
            defaults: ResourceDefaults::global(),
            pull_policy: None,
            finished: false,
        }
    }

    /// Use `defaults` instead of the process-wide registry for QoS upgrades
    pub fn with_defaults(mut self, defaults: Arc<ResourceDefaults>) -> Self {
        self.defaults = defaults;
        self
    }

    /// The first recorded error, if any
    pub fn error(&self) -> Option<&BuildError> {
        self.error.as_ref()
    }

    /// Pod template labels set so far
    pub fn pod_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.object
            .template()
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.labels.as_ref())
    }

    fn apply(mut self, op: impl FnOnce(&mut W) -> Result<(), BuildError>) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.finished = false;
        if let Err(err) = op(&mut self.object) {
            self.error = Some(err);
        }
        self
    }

    fn apply_template(self, op: impl FnOnce(&mut PodTemplateSpec) -> Result<(), BuildError>) -> Self {
        self.apply(|object| op(object.template_mut()))
    }

    /// Replace the whole object being built
    pub fn replace(self, object: W) -> Self {
        self.apply(|current| {
            *current = object;
            Ok(())
        })
    }

    pub fn set_name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.apply(|object| {
            object.metadata_mut().name = Some(name);
            Ok(())
        })
    }

    /// Set the namespace of the workload and of its pods
    pub fn set_namespace(self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.apply(|object| {
            object.metadata_mut().namespace = Some(namespace.clone());
            object
                .template_mut()
                .metadata
                .get_or_insert_with(ObjectMeta::default)
                .namespace = Some(namespace);
            Ok(())
        })
    }

    pub fn set_namespace_and_name(self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.set_namespace(namespace).set_name(name)
    }

    /// Labels on the workload object itself
    pub fn set_labels<I, K, V>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let labels = label_map(labels);
        self.apply(|object| {
            object.metadata_mut().labels = Some(labels);
            Ok(())
        })
    }

    /// Merge annotations into the workload object
    pub fn set_annotations<I, K, V>(self, annotations: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let annotations = label_map(annotations);
        self.apply(|object| {
            object
                .metadata_mut()
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(annotations);
            Ok(())
        })
    }

    /// Set the selector and the pod template labels to the same map
    pub fn set_selector<I, K, V>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.bind_labels("selector", label_map(labels))
    }

    /// Set the pod template labels and the selector to the same map
    pub fn set_pod_labels<I, K, V>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.bind_labels("pod labels", label_map(labels))
    }

    fn bind_labels(self, field: &'static str, labels: BTreeMap<String, String>) -> Self {
        self.apply(|object| {
            if labels.is_empty() {
                return Err(BuildError::EmptyLabels { field });
            }
            object.selector_mut().match_labels = Some(labels.clone());
            object
                .template_mut()
                .metadata
                .get_or_insert_with(ObjectMeta::default)
                .labels = Some(labels);
            Ok(())
        })
    }

    /// Add a container, or fill the first container that has no image yet
    pub fn set_container(self, name: &str, image: &str, port: i32) -> Self {
        self.apply_template(|t| template::set_container(t, name, image, port))
    }

    /// Append a fully formed container as-is
    pub fn set_container_one(self, container: Container) -> Self {
        self.apply_template(|t| {
            template::set_container_one(t, container);
            Ok(())
        })
    }

    /// Resource limits for every container that has none yet
    pub fn set_resource_limit(self, limits: ResourceMap) -> Self {
        self.apply_template(|t| template::set_resource_limit(t, &limits))
    }

    /// Resource requests for every container that has none yet
    pub fn set_resource_request(self, requests: ResourceMap) -> Self {
        self.apply_template(|t| template::set_resource_requests(t, &requests))
    }

    /// Like [`set_resource_limit`](Self::set_resource_limit) with resource
    /// names given as strings; an unknown name is recorded as the error
    pub fn set_resource_limit_named<I, K, V>(self, limits: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let limits = resource_map_from_pairs(limits);
        self.apply_template(|t| template::set_resource_limit(t, &limits?))
    }

    /// Like [`set_resource_request`](Self::set_resource_request) with
    /// resource names given as strings
    pub fn set_resource_request_named<I, K, V>(self, requests: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let requests = resource_map_from_pairs(requests);
        self.apply_template(|t| template::set_resource_requests(t, &requests?))
    }

    /// Environment variables for every container that has none yet
    pub fn set_envs<I, K, V>(self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.apply_template(|t| template::set_envs(t, envs))
    }

    pub fn set_http_liveness(
        self,
        port: i32,
        path: &str,
        timing: ProbeTiming,
        headers: &BTreeMap<String, String>,
    ) -> Self {
        self.apply_template(|t| {
            template::set_liveness(t, template::http_probe(port, path, timing, headers));
            Ok(())
        })
    }

    pub fn set_cmd_liveness(self, command: &[String], timing: ProbeTiming) -> Self {
        self.apply_template(|t| {
            template::set_liveness(t, template::cmd_probe(command, timing));
            Ok(())
        })
    }

    pub fn set_tcp_liveness(self, host: &str, port: i32, timing: ProbeTiming) -> Self {
        self.apply_template(|t| {
            template::set_liveness(t, template::tcp_probe(host, port, timing));
            Ok(())
        })
    }

    pub fn set_http_readiness(
        self,
        port: i32,
        path: &str,
        timing: ProbeTiming,
        headers: &BTreeMap<String, String>,
    ) -> Self {
        self.apply_template(|t| {
            template::set_readiness(t, template::http_probe(port, path, timing, headers));
            Ok(())
        })
    }

    pub fn set_cmd_readiness(self, command: &[String], timing: ProbeTiming) -> Self {
        self.apply_template(|t| {
            template::set_readiness(t, template::cmd_probe(command, timing));
            Ok(())
        })
    }

    pub fn set_tcp_readiness(self, host: &str, port: i32, timing: ProbeTiming) -> Self {
        self.apply_template(|t| {
            template::set_readiness(t, template::tcp_probe(host, port, timing));
            Ok(())
        })
    }

    pub fn set_pre_stop_exec(self, command: &[String]) -> Self {
        self.apply_template(|t| {
            template::set_pre_stop(t, template::exec_handler(command));
            Ok(())
        })
    }

    pub fn set_post_start_exec(self, command: &[String]) -> Self {
        self.apply_template(|t| {
            template::set_post_start(t, template::exec_handler(command));
            Ok(())
        })
    }

    pub fn set_pre_stop_http(
        self,
        scheme: UriScheme,
        host: &str,
        port: i32,
        path: &str,
        headers: &BTreeMap<String, String>,
    ) -> Self {
        self.apply_template(|t| {
            template::set_pre_stop(t, template::http_handler(scheme, host, port, path, headers));
            Ok(())
        })
    }

    pub fn set_post_start_http(
        self,
        scheme: UriScheme,
        host: &str,
        port: i32,
        path: &str,
        headers: &BTreeMap<String, String>,
    ) -> Self {
        self.apply_template(|t| {
            template::set_post_start(t, template::http_handler(scheme, host, port, path, headers));
            Ok(())
        })
    }

    /// Declare a PersistentVolumeClaim volume named `volume_name`
    pub fn set_pv_claim(self, volume_name: &str, claim_name: &str) -> Self {
        self.apply_template(|t| template::set_pv_claim(t, volume_name, claim_name))
    }

    /// Mount a declared volume into the first container
    pub fn set_pvc_mounts(self, volume_name: &str, mount_path: &str) -> Self {
        self.apply_template(|t| template::set_pvc_mounts(t, volume_name, mount_path))
    }

    pub fn set_image_pull_secrets(self, secret_name: &str) -> Self {
        self.apply_template(|t| {
            template::set_image_pull_secrets(t, secret_name);
            Ok(())
        })
    }

    /// The PriorityClass must already exist in the cluster
    pub fn set_pod_priority_class(self, priority_class_name: &str) -> Self {
        self.apply_template(|t| template::set_priority_class(t, priority_class_name))
    }

    /// Require nodes matching `key`; each call adds a term the scheduler ORs
    pub fn set_required_or_node_affinity<I, S>(
        self,
        key: &str,
        values: I,
        operator: NodeSelectorOperator,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        self.apply_template(|t| {
            let requirement = template::node_requirement(key, &values, operator)?;
            template::set_required_or_node_affinity(t, requirement);
            Ok(())
        })
    }

    /// Require nodes matching `key` in addition to every existing term
    pub fn set_required_and_node_affinity<I, S>(
        self,
        key: &str,
        values: I,
        operator: NodeSelectorOperator,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        self.apply_template(|t| {
            let requirement = template::node_requirement(key, &values, operator)?;
            template::set_required_and_node_affinity(t, requirement);
            Ok(())
        })
    }

    /// Prefer nodes matching `key`, with a weight in 1..=100
    pub fn set_preferred_node_affinity<I, S>(
        self,
        weight: i32,
        key: &str,
        values: I,
        operator: NodeSelectorOperator,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        self.apply_template(|t| {
            let requirement = template::node_requirement(key, &values, operator)?;
            template::set_preferred_node_affinity(t, weight, requirement)
        })
    }

    /// Remove node affinity requirements on `keys`
    pub fn del_node_affinity<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        self.apply_template(|t| {
            template::del_node_affinity(t, &keys);
            Ok(())
        })
    }

    /// Tolerate a node taint
    ///
    /// `delay_secs` only applies to `NoExecute`, where it defaults to 0.
    pub fn set_toleration(
        self,
        key: &str,
        value: &str,
        operator: TolerationOperator,
        effect: Option<TaintEffect>,
        delay_secs: Option<i64>,
    ) -> Self {
        self.apply_template(|t| template::set_toleration(t, key, value, operator, effect, delay_secs))
    }

    /// Selector `matchExpressions`, ANDed with the selector labels
    pub fn set_match_expressions<I>(self, requirements: I) -> Self
    where
        I: IntoIterator<Item = LabelRequirement>,
    {
        let requirements: Vec<LabelRequirement> = requirements.into_iter().collect();
        self.apply(|object| template::set_match_expressions(object.selector_mut(), &requirements))
    }

    /// Pull policy applied to every container at `finish`
    pub fn image_pull_policy(self, policy: PullPolicy) -> Self {
        self.set_annotations([(IMAGE_PULL_POLICY_ANNOTATION, policy.as_str())])
    }

    /// Desired QoS class, checked at `finish`
    ///
    /// With `auto_upgrade`, a `BestEffort` workload is raised to the desired
    /// class from the registered resource defaults instead of failing.
    pub fn set_pod_qos(self, class: QosClass, auto_upgrade: bool) -> Self {
        self.set_annotations([
            (QOS_ANNOTATION, class.as_str()),
            (AUTO_QOS_ANNOTATION, if auto_upgrade { "true" } else { "false" }),
        ])
    }

    /// Validate and return the finished object, or the first error
    ///
    /// Calling `finish` again without further setter calls returns the same
    /// result without re-running validation.
    pub fn finish(&mut self) -> Result<W, BuildError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.finished {
            return Ok(self.object.clone());
        }

        match self.verify() {
            Ok(()) => {
                self.finished = true;
                let meta = self.object.metadata();
                debug!(
                    event = "workload_finished",
                    kind = W::KIND,
                    namespace = meta.namespace.as_deref().unwrap_or_default(),
                    name = meta.name.as_deref().unwrap_or_default(),
                    "Workload validated"
                );
                Ok(self.object.clone())
            }
            Err(err) => {
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Finish the workload and hand it to `submitter`
    ///
    /// The submitter is never called when `finish` fails.
    pub fn release<S>(&mut self, submitter: &S) -> Result<W, ReleaseError>
    where
        S: Submitter<W> + ?Sized,
    {
        let workload = self.finish()?;
        submitter
            .submit(&workload)
            .map_err(|source| ReleaseError::Submit {
                kind: W::KIND,
                namespace: workload.metadata().namespace.clone().unwrap_or_default(),
                name: workload.metadata().name.clone().unwrap_or_default(),
                source,
            })?;
        Ok(workload)
    }

    fn verify(&mut self) -> Result<(), BuildError> {
        let kind = W::KIND;

        if is_blank(self.object.metadata().name.as_ref()) {
            return Err(BuildError::MissingName { kind });
        }

        if is_blank(self.object.metadata().namespace.as_ref()) {
            self.object.metadata_mut().namespace = Some(DEFAULT_NAMESPACE.to_string());
        }
        let namespace = self.object.metadata().namespace.clone();
        let pod_meta = self
            .object
            .template_mut()
            .metadata
            .get_or_insert_with(ObjectMeta::default);
        if is_blank(pod_meta.namespace.as_ref()) {
            pod_meta.namespace = namespace;
        }

        let containers = self
            .object
            .template()
            .map(template::containers)
            .unwrap_or(&[]);
        if containers.is_empty() {
            return Err(BuildError::NoContainers { kind });
        }
        template::verify_containers(containers)?;

        let pod_labels = match self.pod_labels() {
            Some(labels) if !labels.is_empty() => labels.clone(),
            _ => return Err(BuildError::MissingPodLabels { kind }),
        };
        let selector_matches = self
            .object
            .selector()
            .and_then(|s| s.match_labels.as_ref())
            .filter(|labels| !labels.is_empty())
            .map(|labels| *labels == pod_labels);
        match selector_matches {
            None => self.object.selector_mut().match_labels = Some(pod_labels),
            Some(true) => {}
            Some(false) => return Err(BuildError::SelectorMismatch { kind }),
        }

        self.verify_qos()?;
        self.apply_pull_policy();
        self.object.verify_kind()
    }

    fn verify_qos(&mut self) -> Result<(), BuildError> {
        let annotations = self.object.metadata().annotations.as_ref();
        let desired = match annotations.and_then(|a| a.get(QOS_ANNOTATION)) {
            Some(value) if !value.trim().is_empty() => Some(value.parse::<QosClass>()?),
            _ => None,
        };
        let auto_upgrade = annotations
            .and_then(|a| a.get(AUTO_QOS_ANNOTATION))
            .map(|v| v == "true")
            .unwrap_or(false);

        let containers = self
            .object
            .template()
            .map(template::containers)
            .unwrap_or(&[]);
        match qos::check(desired, containers) {
            Ok(_) => Ok(()),
            Err(BuildError::QosMismatch {
                desired, actual, ..
            }) if auto_upgrade => {
                let snapshot = self.defaults.snapshot();
                qos::upgrade(
                    desired,
                    actual,
                    template::containers_mut(self.object.template_mut()),
                    &snapshot,
                )
            }
            Err(err) => Err(err),
        }
    }

    /// A fresh annotation overrides every container; otherwise only
    /// containers without a policy get the last chosen one
    fn apply_pull_policy(&mut self) {
        let annotated = self
            .object
            .metadata_mut()
            .annotations
            .as_mut()
            .and_then(|a| a.remove(IMAGE_PULL_POLICY_ANNOTATION))
            .map(|p| PullPolicy::parse_lenient(&p));
        if annotated.is_some() {
            self.pull_policy = annotated;
        }
        let policy = self.pull_policy.unwrap_or_default();

        for container in template::containers_mut(self.object.template_mut()) {
            if annotated.is_some() || is_blank(container.image_pull_policy.as_ref()) {
                container.image_pull_policy = Some(policy.as_str().to_string());
            }
        }
    }
}

impl WorkloadBuilder<Deployment> {
    pub fn set_replicas(self, replicas: i32) -> Self {
        self.apply(|object| {
            object.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
            Ok(())
        })
    }

    /// Negative values become 0
    pub fn set_min_ready_seconds(self, seconds: i32) -> Self {
        self.apply(|object| {
            object.spec.get_or_insert_with(Default::default).min_ready_seconds =
                Some(seconds.max(0));
            Ok(())
        })
    }

    /// Revisions kept for rollback; non-positive values become 10
    pub fn set_history_limit(self, limit: i32) -> Self {
        self.apply(|object| {
            object
                .spec
                .get_or_insert_with(Default::default)
                .revision_history_limit = Some(if limit <= 0 { 10 } else { limit });
            Ok(())
        })
    }

    /// Progress deadline; negative values become 600
    pub fn set_deploy_max_time(self, seconds: i32) -> Self {
        self.apply(|object| {
            object
                .spec
                .get_or_insert_with(Default::default)
                .progress_deadline_seconds = Some(if seconds < 0 { 600 } else { seconds });
            Ok(())
        })
    }
}

impl WorkloadBuilder<StatefulSet> {
    pub fn set_replicas(self, replicas: i32) -> Self {
        self.apply(|object| {
            object.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
            Ok(())
        })
    }

    /// Headless service governing the set; required
    pub fn set_service_name(self, service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        self.apply(|object| {
            object.spec.get_or_insert_with(Default::default).service_name = service_name;
            Ok(())
        })
    }
}

impl WorkloadBuilder<DaemonSet> {
    /// Negative values become 0
    pub fn set_min_ready_seconds(self, seconds: i32) -> Self {
        self.apply(|object| {
            object.spec.get_or_insert_with(Default::default).min_ready_seconds =
                Some(seconds.max(0));
            Ok(())
        })
    }

    /// Revisions kept for rollback; non-positive values become 10
    pub fn set_history_limit(self, limit: i32) -> Self {
        self.apply(|object| {
            object
                .spec
                .get_or_insert_with(Default::default)
                .revision_history_limit = Some(if limit <= 0 { 10 } else { limit });
            Ok(())
        })
    }
}
