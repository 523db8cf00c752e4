//! Workload kinds the builder can assemble

use crate::error::BuildError;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::{Metadata, Resource};
use serde::Serialize;

/// A workload object made of metadata, a label selector and a pod template
pub trait Workload:
    Resource + Metadata<Ty = ObjectMeta> + Clone + Default + Serialize + Send + Sync
{
    fn template(&self) -> Option<&PodTemplateSpec>;

    fn template_mut(&mut self) -> &mut PodTemplateSpec;

    fn selector(&self) -> Option<&LabelSelector>;

    fn selector_mut(&mut self) -> &mut LabelSelector;

    /// Checks that only apply to this kind, run last during `finish`
    fn verify_kind(&self) -> Result<(), BuildError> {
        Ok(())
    }
}

impl Workload for Deployment {
    fn template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn template_mut(&mut self) -> &mut PodTemplateSpec {
        &mut self.spec.get_or_insert_with(Default::default).template
    }

    fn selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().map(|spec| &spec.selector)
    }

    fn selector_mut(&mut self) -> &mut LabelSelector {
        &mut self.spec.get_or_insert_with(Default::default).selector
    }
}

impl Workload for StatefulSet {
    fn template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn template_mut(&mut self) -> &mut PodTemplateSpec {
        &mut self.spec.get_or_insert_with(Default::default).template
    }

    fn selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().map(|spec| &spec.selector)
    }

    fn selector_mut(&mut self) -> &mut LabelSelector {
        &mut self.spec.get_or_insert_with(Default::default).selector
    }

    fn verify_kind(&self) -> Result<(), BuildError> {
        let service_name = self
            .spec
            .as_ref()
            .map(|spec| spec.service_name.trim())
            .unwrap_or("");
        if service_name.is_empty() {
            return Err(BuildError::EmptyField {
                field: "StatefulSet.spec.serviceName",
            });
        }
        Ok(())
    }
}

impl Workload for DaemonSet {
    fn template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn template_mut(&mut self) -> &mut PodTemplateSpec {
        &mut self.spec.get_or_insert_with(Default::default).template
    }

    fn selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().map(|spec| &spec.selector)
    }

    fn selector_mut(&mut self) -> &mut LabelSelector {
        &mut self.spec.get_or_insert_with(Default::default).selector
    }
}
