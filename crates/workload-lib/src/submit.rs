//! Hand-off point for finished workloads
//!
//! The builder never talks to a cluster itself. `release` finishes the
//! workload and passes it to a [`Submitter`], which may write a manifest,
//! call an API server, or record the object in a test.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::{Metadata, Resource};
use serde::Serialize;
use std::sync::Mutex;

/// Receives a workload that passed validation
pub trait Submitter<W> {
    fn submit(&self, workload: &W) -> anyhow::Result<()>;
}

/// Submitter that keeps every workload it receives as JSON
///
/// Useful for dry runs and for inspecting what would have been submitted.
#[derive(Debug, Default)]
pub struct RecordingSubmitter {
    submitted: Mutex<Vec<serde_json::Value>>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workloads received so far, oldest first
    pub fn submitted(&self) -> Vec<serde_json::Value> {
        match self.submitted.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl<W> Submitter<W> for RecordingSubmitter
where
    W: Resource + Metadata<Ty = ObjectMeta> + Serialize,
{
    fn submit(&self, workload: &W) -> anyhow::Result<()> {
        let value = serde_json::to_value(workload)?;
        tracing::debug!(
            event = "workload_recorded",
            kind = W::KIND,
            name = workload.metadata().name.as_deref().unwrap_or_default(),
            "Recorded workload"
        );
        match self.submitted.lock() {
            Ok(mut guard) => guard.push(value),
            Err(poisoned) => poisoned.into_inner().push(value),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;

    #[test]
    fn test_recording_submitter_keeps_kind_and_version() {
        let submitter = RecordingSubmitter::new();
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        submitter.submit(&deployment).unwrap();

        let submitted = submitter.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0]["kind"], "Deployment");
        assert_eq!(submitted[0]["apiVersion"], "apps/v1");
        assert_eq!(submitted[0]["metadata"]["name"], "web");
    }
}
