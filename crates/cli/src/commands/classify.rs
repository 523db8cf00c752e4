//! Classify an existing workload manifest

use anyhow::{bail, Context, Result};
use colored::Colorize;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Container;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;
use workload_lib::{qos, template, QosClass, StructuredLogger, Workload, QOS_ANNOTATION};

use crate::output::{self, color_qos, or_dash, print_warning, OutputFormat};

/// Row for the per-container resource table
#[derive(Debug, Serialize, Tabled)]
struct ContainerRow {
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "CPU Request")]
    cpu_request: String,
    #[tabled(rename = "CPU Limit")]
    cpu_limit: String,
    #[tabled(rename = "Memory Request")]
    memory_request: String,
    #[tabled(rename = "Memory Limit")]
    memory_limit: String,
}

impl ContainerRow {
    fn from_container(container: &Container) -> Self {
        let resources = container.resources.as_ref();
        let quantity = |requests: bool, name: &str| {
            let map = resources.and_then(|r| {
                if requests {
                    r.requests.as_ref()
                } else {
                    r.limits.as_ref()
                }
            });
            or_dash(map.and_then(|m| m.get(name)).map(|q| q.0.as_str()))
        };

        Self {
            container: container.name.clone(),
            image: or_dash(container.image.as_deref()),
            cpu_request: quantity(true, "cpu"),
            cpu_limit: quantity(false, "cpu"),
            memory_request: quantity(true, "memory"),
            memory_limit: quantity(false, "memory"),
        }
    }
}

/// Classification result for YAML/JSON output
#[derive(Debug, Serialize)]
struct ClassifyReport {
    kind: String,
    namespace: String,
    name: String,
    qos: QosClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    desired: Option<QosClass>,
    containers: Vec<ContainerRow>,
}

/// Classify the workload manifest at `path`
///
/// With `strict`, a manifest whose `qos` annotation disagrees with its
/// computed class is an error.
pub fn classify_manifest(path: &Path, strict: bool, format: OutputFormat) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let value: serde_yaml::Value = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
    let logger = StructuredLogger::new(path.display().to_string());

    let kind = value
        .get("kind")
        .and_then(|kind| kind.as_str())
        .unwrap_or_default()
        .to_string();
    match kind.as_str() {
        "Deployment" => report(&decode::<Deployment>(value)?, strict, format, &logger),
        "StatefulSet" => report(&decode::<StatefulSet>(value)?, strict, format, &logger),
        "DaemonSet" => report(&decode::<DaemonSet>(value)?, strict, format, &logger),
        "" => bail!("Manifest {} has no kind", path.display()),
        other => bail!("Unsupported kind '{other}', expected Deployment, StatefulSet or DaemonSet"),
    }
}

fn decode<W: Workload + serde::de::DeserializeOwned>(value: serde_yaml::Value) -> Result<W> {
    serde_yaml::from_value(value).with_context(|| format!("Invalid {} manifest", W::KIND))
}

fn report<W: Workload>(
    workload: &W,
    strict: bool,
    format: OutputFormat,
    logger: &StructuredLogger,
) -> Result<()> {
    let meta = workload.metadata();
    let namespace = meta.namespace.clone().unwrap_or_default();
    let name = meta.name.clone().unwrap_or_default();
    let desired = match meta.annotations.as_ref().and_then(|a| a.get(QOS_ANNOTATION)) {
        Some(value) if !value.trim().is_empty() => Some(value.parse::<QosClass>()?),
        _ => None,
    };

    let containers = workload.template().map(template::containers).unwrap_or(&[]);
    let class = qos::classify(containers);
    logger.log_classified(W::KIND, &name, class);

    let rows: Vec<ContainerRow> = containers.iter().map(ContainerRow::from_container).collect();
    match format {
        OutputFormat::Table => {
            println!(
                "{} {}/{}: {}",
                W::KIND.bold(),
                namespace,
                name,
                color_qos(class)
            );
            output::print_table(&rows, format)?;
        }
        OutputFormat::Yaml | OutputFormat::Json => {
            let report = ClassifyReport {
                kind: W::KIND.to_string(),
                namespace,
                name,
                qos: class,
                desired,
                containers: rows,
            };
            print!("{}", output::render(&report, format)?);
        }
    }

    if let Err(err) = qos::check(desired, containers) {
        if strict {
            return Err(err.into());
        }
        print_warning(&err.to_string());
    }
    Ok(())
}
