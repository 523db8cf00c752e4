//! Observability for workload building
//!
//! Provides:
//! - Tracing subscriber setup (JSON or human-readable, filtered by `RUST_LOG`)
//! - Structured logging of build, classification and release events

use crate::error::BuildError;
use crate::qos::QosClass;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `default_level` when set. Returns false if a
/// subscriber was already installed.
pub fn init_tracing(json: bool, default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.is_ok()
}

/// Structured logger for workload events
///
/// Every event carries the `source` the workload was built from, such as a
/// plan file path.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    source: String,
}

impl StructuredLogger {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Log a workload that passed `finish`
    pub fn log_workload_built(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        containers: usize,
        qos: QosClass,
    ) {
        info!(
            event = "workload_built",
            source = %self.source,
            kind = %kind,
            namespace = %namespace,
            name = %name,
            containers = containers,
            qos = %qos,
            "Built workload"
        );
    }

    /// Log a workload rejected by `finish`
    pub fn log_build_failed(&self, kind: &str, name: &str, error: &BuildError) {
        warn!(
            event = "workload_rejected",
            source = %self.source,
            kind = %kind,
            name = %name,
            tier_policy = error.is_tier_policy(),
            error = %error,
            "Workload failed validation"
        );
    }

    /// Log a classification result
    pub fn log_classified(&self, kind: &str, name: &str, qos: QosClass) {
        info!(
            event = "workload_classified",
            source = %self.source,
            kind = %kind,
            name = %name,
            qos = %qos,
            "Classified workload"
        );
    }

    /// Log a workload handed to a submitter
    pub fn log_released(&self, kind: &str, namespace: &str, name: &str, target: &str) {
        info!(
            event = "workload_released",
            source = %self.source,
            kind = %kind,
            namespace = %namespace,
            name = %name,
            target = %target,
            "Released workload"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("plans/web.yaml");
        assert_eq!(logger.source, "plans/web.yaml");
    }

    #[test]
    fn test_logging_without_subscriber_is_silent() {
        let logger = StructuredLogger::new("inline");
        logger.log_workload_built("Deployment", "default", "web", 1, QosClass::Burstable);
        logger.log_build_failed("Deployment", "web", &BuildError::EmptyImage);
        logger.log_classified("Deployment", "web", QosClass::BestEffort);
        logger.log_released("Deployment", "default", "web", "stdout");
    }
}
