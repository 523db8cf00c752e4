//! Build a workload from a plan file

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tabled::Tabled;
use workload_lib::builder::{DaemonSetBuilder, DeploymentBuilder, StatefulSetBuilder};
use workload_lib::{
    classify, template, LabelRequirement, NodeSelectorOperator, ProbeTiming, PullPolicy,
    QosClass, ReleaseError, StructuredLogger, Submitter, TaintEffect, TolerationOperator,
    UriScheme, Workload, WorkloadBuilder,
};

use crate::output::{self, color_qos, OutputFormat};

/// A workload described field by field
///
/// Every field maps onto one builder setter and is replayed in a fixed order,
/// so the first invalid field is the one reported.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BuildPlan {
    pub kind: PlanKind,
    #[serde(default)]
    pub name: String,
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub pod_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<ContainerPlan>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    pub liveness: Option<ProbePlan>,
    pub readiness: Option<ProbePlan>,
    pub pre_stop: Option<HookPlan>,
    pub post_start: Option<HookPlan>,
    #[serde(default)]
    pub volumes: Vec<VolumePlan>,
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
    pub priority_class: Option<String>,
    pub node_affinity: Option<NodeAffinityPlan>,
    #[serde(default)]
    pub tolerations: Vec<TolerationPlan>,
    #[serde(default)]
    pub match_expressions: Vec<LabelRequirement>,
    pub image_pull_policy: Option<PullPolicy>,
    pub qos: Option<QosPlan>,
    pub replicas: Option<i32>,
    pub service_name: Option<String>,
    pub min_ready_seconds: Option<i32>,
    pub history_limit: Option<i32>,
    pub deploy_max_time: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PlanKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerPlan {
    #[serde(default)]
    pub name: String,
    pub image: String,
    pub port: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbePlan {
    #[serde(flatten)]
    pub action: ProbeAction,
    #[serde(default)]
    pub initial_delay_secs: i32,
    #[serde(default)]
    pub timeout_secs: i32,
    #[serde(default)]
    pub period_secs: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeAction {
    Http {
        port: i32,
        #[serde(default)]
        path: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Cmd {
        command: Vec<String>,
    },
    Tcp {
        #[serde(default)]
        host: String,
        port: i32,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPlan {
    Exec {
        command: Vec<String>,
    },
    Http {
        #[serde(default)]
        scheme: UriScheme,
        #[serde(default)]
        host: String,
        port: i32,
        #[serde(default)]
        path: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumePlan {
    pub name: String,
    pub claim: String,
    pub mount_path: Option<String>,
}

/// Node affinity requirements
///
/// `required` entries are ORed as separate terms, `requiredAll` entries are
/// ANDed into every term.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NodeAffinityPlan {
    #[serde(default)]
    pub required: Vec<NodeRequirementPlan>,
    #[serde(default)]
    pub required_all: Vec<NodeRequirementPlan>,
    #[serde(default)]
    pub preferred: Vec<PreferredNodePlan>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeRequirementPlan {
    pub key: String,
    pub operator: NodeSelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferredNodePlan {
    pub weight: i32,
    #[serde(flatten)]
    pub requirement: NodeRequirementPlan,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TolerationPlan {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub operator: TolerationOperator,
    pub effect: Option<TaintEffect>,
    pub delay_secs: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QosPlan {
    pub class: QosClass,
    #[serde(default)]
    pub auto: bool,
}

impl BuildPlan {
    /// Load a plan from a YAML or JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan {}", path.display()))?;
        // YAML is a superset of JSON
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse plan {}", path.display()))
    }

    fn reject(&self, field: &str, present: bool) -> Result<()> {
        if present {
            bail!("{field} is not supported for kind {:?}", self.kind);
        }
        Ok(())
    }

    /// Replay the fields every workload kind shares
    fn apply<W: Workload>(&self, mut builder: WorkloadBuilder<W>) -> WorkloadBuilder<W> {
        if let Some(namespace) = &self.namespace {
            builder = builder.set_namespace(namespace.as_str());
        }
        builder = builder.set_name(self.name.as_str());
        if !self.labels.is_empty() {
            builder = builder.set_labels(self.labels.clone());
        }
        if !self.annotations.is_empty() {
            builder = builder.set_annotations(self.annotations.clone());
        }
        if !self.pod_labels.is_empty() {
            builder = builder.set_pod_labels(self.pod_labels.clone());
        }
        for container in &self.containers {
            builder = builder.set_container(&container.name, &container.image, container.port);
        }
        if !self.envs.is_empty() {
            builder = builder.set_envs(&self.envs);
        }
        if !self.limits.is_empty() {
            builder = builder.set_resource_limit_named(&self.limits);
        }
        if !self.requests.is_empty() {
            builder = builder.set_resource_request_named(&self.requests);
        }
        if let Some(probe) = &self.liveness {
            let timing = probe.timing();
            builder = match &probe.action {
                ProbeAction::Http { port, path, headers } => {
                    builder.set_http_liveness(*port, path, timing, headers)
                }
                ProbeAction::Cmd { command } => builder.set_cmd_liveness(command, timing),
                ProbeAction::Tcp { host, port } => builder.set_tcp_liveness(host, *port, timing),
            };
        }
        if let Some(probe) = &self.readiness {
            let timing = probe.timing();
            builder = match &probe.action {
                ProbeAction::Http { port, path, headers } => {
                    builder.set_http_readiness(*port, path, timing, headers)
                }
                ProbeAction::Cmd { command } => builder.set_cmd_readiness(command, timing),
                ProbeAction::Tcp { host, port } => builder.set_tcp_readiness(host, *port, timing),
            };
        }
        if let Some(hook) = &self.pre_stop {
            builder = match hook {
                HookPlan::Exec { command } => builder.set_pre_stop_exec(command),
                HookPlan::Http {
                    scheme,
                    host,
                    port,
                    path,
                    headers,
                } => builder.set_pre_stop_http(*scheme, host, *port, path, headers),
            };
        }
        if let Some(hook) = &self.post_start {
            builder = match hook {
                HookPlan::Exec { command } => builder.set_post_start_exec(command),
                HookPlan::Http {
                    scheme,
                    host,
                    port,
                    path,
                    headers,
                } => builder.set_post_start_http(*scheme, host, *port, path, headers),
            };
        }
        for volume in &self.volumes {
            builder = builder.set_pv_claim(&volume.name, &volume.claim);
            if let Some(mount_path) = &volume.mount_path {
                builder = builder.set_pvc_mounts(&volume.name, mount_path);
            }
        }
        for secret in &self.image_pull_secrets {
            builder = builder.set_image_pull_secrets(secret);
        }
        if let Some(priority_class) = &self.priority_class {
            builder = builder.set_pod_priority_class(priority_class);
        }
        if let Some(affinity) = &self.node_affinity {
            for r in &affinity.required {
                builder = builder.set_required_or_node_affinity(&r.key, &r.values, r.operator);
            }
            for r in &affinity.required_all {
                builder = builder.set_required_and_node_affinity(&r.key, &r.values, r.operator);
            }
            for p in &affinity.preferred {
                let r = &p.requirement;
                builder = builder.set_preferred_node_affinity(p.weight, &r.key, &r.values, r.operator);
            }
        }
        for t in &self.tolerations {
            builder = builder.set_toleration(&t.key, &t.value, t.operator, t.effect, t.delay_secs);
        }
        if !self.match_expressions.is_empty() {
            builder = builder.set_match_expressions(self.match_expressions.clone());
        }
        if let Some(policy) = self.image_pull_policy {
            builder = builder.image_pull_policy(policy);
        }
        if let Some(qos) = &self.qos {
            builder = builder.set_pod_qos(qos.class, qos.auto);
        }
        builder
    }
}

impl ProbePlan {
    fn timing(&self) -> ProbeTiming {
        ProbeTiming::new(self.initial_delay_secs, self.timeout_secs, self.period_secs)
    }
}

/// Writes finished workloads as manifests to stdout or a file
pub struct ManifestWriter {
    format: OutputFormat,
    output: Option<PathBuf>,
}

impl ManifestWriter {
    pub fn new(format: OutputFormat, output: Option<PathBuf>) -> Self {
        Self { format, output }
    }

    fn target(&self) -> String {
        self.output
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "stdout".to_string())
    }
}

impl<W: Workload> Submitter<W> for ManifestWriter {
    fn submit(&self, workload: &W) -> Result<()> {
        let rendered = output::render(workload, self.format)?;
        match &self.output {
            Some(path) => std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write manifest {}", path.display()))?,
            None => print!("{rendered}"),
        }
        Ok(())
    }
}

/// Summary row for table output
#[derive(Serialize, Tabled)]
struct WorkloadRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Containers")]
    containers: usize,
    #[tabled(rename = "QoS")]
    qos: String,
}

/// Build the workload described by the plan at `path`
pub fn build_workload(path: &Path, output: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let plan = BuildPlan::load(path)?;
    let logger = StructuredLogger::new(path.display().to_string());
    let writer = ManifestWriter::new(format, output);

    match plan.kind {
        PlanKind::Deployment => {
            plan.reject("serviceName", plan.service_name.is_some())?;
            let mut builder = plan.apply(DeploymentBuilder::new());
            if let Some(replicas) = plan.replicas {
                builder = builder.set_replicas(replicas);
            }
            if let Some(seconds) = plan.min_ready_seconds {
                builder = builder.set_min_ready_seconds(seconds);
            }
            if let Some(limit) = plan.history_limit {
                builder = builder.set_history_limit(limit);
            }
            if let Some(seconds) = plan.deploy_max_time {
                builder = builder.set_deploy_max_time(seconds);
            }
            emit(builder, &plan.name, &writer, &logger, format)
        }
        PlanKind::StatefulSet => {
            plan.reject("minReadySeconds", plan.min_ready_seconds.is_some())?;
            plan.reject("historyLimit", plan.history_limit.is_some())?;
            plan.reject("deployMaxTime", plan.deploy_max_time.is_some())?;
            let mut builder = plan.apply(StatefulSetBuilder::new());
            if let Some(replicas) = plan.replicas {
                builder = builder.set_replicas(replicas);
            }
            if let Some(service_name) = &plan.service_name {
                builder = builder.set_service_name(service_name.as_str());
            }
            emit(builder, &plan.name, &writer, &logger, format)
        }
        PlanKind::DaemonSet => {
            plan.reject("replicas", plan.replicas.is_some())?;
            plan.reject("serviceName", plan.service_name.is_some())?;
            plan.reject("deployMaxTime", plan.deploy_max_time.is_some())?;
            let mut builder = plan.apply(DaemonSetBuilder::new());
            if let Some(seconds) = plan.min_ready_seconds {
                builder = builder.set_min_ready_seconds(seconds);
            }
            if let Some(limit) = plan.history_limit {
                builder = builder.set_history_limit(limit);
            }
            emit(builder, &plan.name, &writer, &logger, format)
        }
    }
}

fn emit<W: Workload>(
    mut builder: WorkloadBuilder<W>,
    plan_name: &str,
    writer: &ManifestWriter,
    logger: &StructuredLogger,
    format: OutputFormat,
) -> Result<()> {
    let result = match format {
        OutputFormat::Table => builder.finish().map_err(ReleaseError::from),
        OutputFormat::Yaml | OutputFormat::Json => builder.release(writer),
    };

    let workload = match result {
        Ok(workload) => workload,
        Err(ReleaseError::Build(err)) => {
            logger.log_build_failed(W::KIND, plan_name, &err);
            return Err(err).context(format!("Failed to build {} '{plan_name}'", W::KIND));
        }
        Err(err) => return Err(err.into()),
    };

    let meta = workload.metadata();
    let namespace = meta.namespace.clone().unwrap_or_default();
    let name = meta.name.clone().unwrap_or_default();
    let containers = workload.template().map(template::containers).unwrap_or(&[]);
    let qos = classify(containers);
    logger.log_workload_built(W::KIND, &namespace, &name, containers.len(), qos);

    if format == OutputFormat::Table {
        let row = WorkloadRow {
            kind: W::KIND.to_string(),
            namespace,
            name,
            containers: containers.len(),
            qos: color_qos(qos),
        };
        output::print_table(&[row], format)?;
    } else {
        logger.log_released(W::KIND, &namespace, &name, &writer.target());
        if writer.output.is_some() {
            output::print_success(&format!(
                "Wrote {} {}/{} to {}",
                W::KIND,
                namespace,
                name,
                writer.target()
            ));
        }
    }
    Ok(())
}
