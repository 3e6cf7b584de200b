//! Common utilities for Kubernetes resource generation
//!
//! Names, labels and ownership shared by every builder, plus the image and
//! pull-secret precedence rules applied to pod templates.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, LocalObjectReference, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::ResourceExt;
use sha2::{Digest, Sha256};

use crate::config::ImageOverrides;
use crate::crd::Backstage;
use crate::model::ExternalConfig;
use crate::model::spec::{NormalizedSpec, PullSecrets};
use crate::platform::PlatformDefaults;

/// API version for the Backstage CRD
pub const API_VERSION: &str = "rhdh.redhat.com/v1alpha4";

/// Kind for the Backstage CRD
pub const KIND: &str = "Backstage";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "backstage-operator";

/// Label selecting the pods of one workload
pub const APP_LABEL: &str = "rhdh.redhat.com/app";

/// Annotation holding the hash of the desired object
pub const DESIRED_STATE_ANNOTATION: &str = "rhdh.redhat.com/desired-state-hash";

/// Name of the application Deployment, Service, Route and Ingress
pub fn app_name(cr_name: &str) -> String {
    format!("backstage-{cr_name}")
}

/// Name of the database StatefulSet and its headless Service
pub fn db_name(cr_name: &str) -> String {
    format!("backstage-psql-{cr_name}")
}

pub fn db_secret_name(cr_name: &str) -> String {
    format!("backstage-psql-secret-{cr_name}")
}

pub fn app_config_name(cr_name: &str) -> String {
    format!("backstage-appconfig-{cr_name}")
}

pub fn dynamic_plugins_name(cr_name: &str) -> String {
    format!("backstage-dynamic-plugins-{cr_name}")
}

/// Longest name a DNS-1123 label may have
const MAX_LABEL_LENGTH: usize = 63;

/// Pod volume name for a referenced ConfigMap or Secret.
///
/// Object names may contain dots and run to 253 characters, volume names
/// must be DNS-1123 labels. Names that already fit are kept readable; any
/// other is cleaned, cut to length and suffixed with a hash of the original
/// so two references never share a volume.
pub fn volume_name(prefix: &str, object_name: &str) -> String {
    let candidate = format!("{prefix}-{object_name}");
    let cleaned: String = candidate
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '-',
        })
        .collect();
    if cleaned == candidate && candidate.len() <= MAX_LABEL_LENGTH {
        return candidate;
    }

    let suffix: String = format!("{:x}", Sha256::digest(candidate.as_bytes()))
        .chars()
        .take(8)
        .collect();
    let head: String = cleaned
        .chars()
        .take(MAX_LABEL_LENGTH - suffix.len() - 1)
        .collect();
    format!("{}-{suffix}", head.trim_end_matches('-'))
}

/// Explicit inputs shared by all builders of one pass
#[derive(Clone, Copy, Debug)]
pub struct BuildContext<'a> {
    pub backstage: &'a Backstage,
    pub images: &'a ImageOverrides,
    pub external: &'a ExternalConfig,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        backstage: &'a Backstage,
        images: &'a ImageOverrides,
        external: &'a ExternalConfig,
    ) -> Self {
        Self {
            backstage,
            images,
            external,
        }
    }

    pub fn cr_name(&self) -> String {
        self.backstage.name_any()
    }

    pub fn namespace(&self) -> Option<String> {
        self.backstage.namespace()
    }

    /// Name, namespace, labels and owner reference of a child object
    pub fn stamp(&self, meta: &mut ObjectMeta, name: String, component: &str) {
        meta.name = Some(name);
        meta.namespace = self.namespace();
        meta.labels
            .get_or_insert_with(BTreeMap::new)
            .extend(standard_labels(&self.cr_name(), component));
        meta.owner_references = Some(vec![owner_reference(self.backstage)]);
        // Server-populated fields a manifest might carry
        meta.resource_version = None;
        meta.uid = None;
        meta.generate_name = None;
    }
}

/// Generate an owner reference for a Backstage instance
///
/// Child objects are garbage collected by the cluster once the CR is gone.
pub fn owner_reference(backstage: &Backstage) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: backstage.name_any(),
        uid: backstage.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels carried by every object of one instance
pub fn standard_labels(cr_name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "backstage".to_string()),
        ("app.kubernetes.io/instance".to_string(), cr_name.to_string()),
        ("app.kubernetes.io/component".to_string(), component.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
    ])
}

/// Point a workload's selector and pod labels at `app_label`
pub fn select_pods(
    selector: &mut LabelSelector,
    template_meta: &mut Option<ObjectMeta>,
    app_label: &str,
) {
    selector.match_labels = Some(BTreeMap::from([(
        APP_LABEL.to_string(),
        app_label.to_string(),
    )]));
    template_meta
        .get_or_insert_with(ObjectMeta::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(APP_LABEL.to_string(), app_label.to_string());
}

/// Apply the pull secret precedence to a pod spec.
///
/// A list set in the CR replaces everything, even when empty. Otherwise the
/// manifest's list stays, and only a manifest without any falls back to the
/// platform defaults.
pub fn apply_pull_secrets(pod: &mut PodSpec, spec: &NormalizedSpec, platform: &PlatformDefaults) {
    match &spec.pull_secrets {
        PullSecrets::Explicit(names) => {
            pod.image_pull_secrets = Some(to_references(names));
        }
        PullSecrets::Unset => {
            let manifest_has_any = pod
                .image_pull_secrets
                .as_ref()
                .is_some_and(|secrets| !secrets.is_empty());
            if !manifest_has_any && !platform.pull_secrets.is_empty() {
                pod.image_pull_secrets = Some(to_references(&platform.pull_secrets));
            }
        }
    }
}

fn to_references(names: &[String]) -> Vec<LocalObjectReference> {
    names
        .iter()
        .map(|name| LocalObjectReference { name: name.clone() })
        .collect()
}

/// First image that is set, in precedence order, or the fallback
pub fn resolve_image(candidates: &[Option<&str>], manifest: Option<&str>, fallback: &str) -> String {
    candidates
        .iter()
        .copied()
        .chain(std::iter::once(manifest))
        .flatten()
        .find(|image| !image.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// The container named `name`, or the first one
pub fn main_container<'c>(containers: &'c mut [Container], name: &str) -> Option<&'c mut Container> {
    let index = containers
        .iter()
        .position(|c| c.name == name)
        .unwrap_or(0);
    containers.get_mut(index)
}
