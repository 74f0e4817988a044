//! Single-shot lookup of a container in the kubelet pod list

use tracing::debug;

use crate::cgroup::ContainerIdentity;
use crate::error::Result;
use crate::kubelet::KubeletClient;
use crate::pods::{ContainerStatus, Pod, PodList};

/// The pod and container a process was found in
#[derive(Debug, Clone)]
pub struct PodMatch {
    pub status: ContainerStatus,
    pub pod_selectors: Vec<String>,
    pub container_selectors: Vec<String>,
}

/// Fetches the pod list once and looks for `identity` in it.
///
/// `Ok(None)` means not found on this attempt; the caller decides whether
/// to poll again.
pub async fn locate(client: &KubeletClient, identity: &ContainerIdentity) -> Result<Option<PodMatch>> {
    let pods = client.get_pod_list().await?;
    Ok(find_container(&pods, identity))
}

pub fn find_container(pods: &PodList, identity: &ContainerIdentity) -> Option<PodMatch> {
    for pod in &pods.items {
        if let Some(uid) = &identity.pod_uid {
            if &pod.metadata.uid != uid {
                continue;
            }
        }
        if let Some(status) = matching_status(pod, &identity.container_id) {
            debug!(
                pod = %pod.metadata.name,
                namespace = %pod.metadata.namespace,
                container = %status.name,
                "Matched container in pod list"
            );
            return Some(PodMatch {
                status: status.clone(),
                pod_selectors: pod.selectors(),
                container_selectors: status.selectors(),
            });
        }
    }
    None
}

fn matching_status<'a>(pod: &'a Pod, container_id: &str) -> Option<&'a ContainerStatus> {
    pod.all_container_statuses()
        .find(|status| !status.container_id.is_empty() && status.runtime_id() == container_id)
}
