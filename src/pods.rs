//! Subset of the Kubernetes pod list served by the kubelet, and the
//! selectors derived from it.

use serde::Deserialize;
use std::collections::BTreeMap;

const RUNTIME_SCHEMES: [&str; 3] = ["docker://", "containerd://", "cri-o://"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PodList {
    pub items: Vec<Pod>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodSpec {
    pub node_name: String,
    pub service_account_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodStatus {
    pub container_statuses: Vec<ContainerStatus>,
    pub init_container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContainerStatus {
    pub name: String,
    pub image: String,
    #[serde(rename = "imageID")]
    pub image_id: String,
    /// `<runtime>://<id>`, empty until the container has started
    #[serde(rename = "containerID")]
    pub container_id: String,
}

impl ContainerStatus {
    /// Container ID without its runtime scheme
    pub fn runtime_id(&self) -> &str {
        RUNTIME_SCHEMES
            .iter()
            .find_map(|scheme| self.container_id.strip_prefix(scheme))
            .unwrap_or(&self.container_id)
    }

    pub fn selectors(&self) -> Vec<String> {
        let mut values = Selectors::default();
        values.push(format!("container-name:{}", self.name));
        if !self.image_id.is_empty() {
            values.push(format!("container-image:{}", self.image_id));
        }
        if !self.image.is_empty() {
            values.push(format!("container-image:{}", self.image));
        }
        values.into_inner()
    }
}

impl Pod {
    pub fn all_container_statuses(&self) -> impl Iterator<Item = &ContainerStatus> {
        self.status
            .container_statuses
            .iter()
            .chain(self.status.init_container_statuses.iter())
    }

    pub fn selectors(&self) -> Vec<String> {
        let mut values = Selectors::default();
        values.push(format!("sa:{}", self.spec.service_account_name));
        values.push(format!("ns:{}", self.metadata.namespace));
        values.push(format!("node-name:{}", self.spec.node_name));
        values.push(format!("pod-uid:{}", self.metadata.uid));
        values.push(format!("pod-name:{}", self.metadata.name));
        values.push(format!(
            "pod-image-count:{}",
            self.status.container_statuses.len()
        ));
        values.push(format!(
            "pod-init-image-count:{}",
            self.status.init_container_statuses.len()
        ));

        for status in &self.status.container_statuses {
            values.push(format!("pod-image:{}", status.image));
            values.push(format!("pod-image:{}", status.image_id));
        }
        for status in &self.status.init_container_statuses {
            values.push(format!("pod-init-image:{}", status.image));
            values.push(format!("pod-init-image:{}", status.image_id));
        }
        for (key, value) in &self.metadata.labels {
            values.push(format!("pod-label:{key}:{value}"));
        }
        for owner in &self.metadata.owner_references {
            values.push(format!("pod-owner:{}:{}", owner.kind, owner.name));
            values.push(format!("pod-owner-uid:{}:{}", owner.kind, owner.uid));
        }
        values.into_inner()
    }
}

/// Insertion-ordered, duplicate-free selector values
#[derive(Default)]
struct Selectors(Vec<String>);

impl Selectors {
    fn push(&mut self, value: String) {
        if !self.0.contains(&value) {
            self.0.push(value);
        }
    }

    fn into_inner(self) -> Vec<String> {
        self.0
    }
}
