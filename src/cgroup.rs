//! Process to container mapping through `/proc/<pid>/cgroup`

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::error::{AttestorError, Result};

static CONTAINER_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[/-])([[:xdigit:]]{64})(?:\.scope)?$")
        .expect("container id regex must compile")
});

static POD_UID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"pod([[:xdigit:]]{8}[-_][[:xdigit:]]{4}[-_][[:xdigit:]]{4}[-_][[:xdigit:]]{4}[-_][[:xdigit:]]{12})",
    )
    .expect("pod uid regex must compile")
});

/// Container a process runs in, as far as its cgroups tell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdentity {
    pub container_id: String,
    /// Present when the cgroup path names the owning pod
    pub pod_uid: Option<String>,
}

/// Maps a process ID to the container it runs in.
///
/// `Ok(None)` means the process is not part of a Kubernetes pod.
pub trait ContainerIdResolver: Send + Sync {
    fn resolve(&self, pid: u32) -> Result<Option<ContainerIdentity>>;
}

/// Reads `<proc root>/<pid>/cgroup`
#[derive(Debug, Clone)]
pub struct ProcCgroupResolver {
    proc_root: PathBuf,
}

impl ProcCgroupResolver {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }
}

impl Default for ProcCgroupResolver {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ContainerIdResolver for ProcCgroupResolver {
    fn resolve(&self, pid: u32) -> Result<Option<ContainerIdentity>> {
        let path = self.proc_root.join(pid.to_string()).join("cgroup");
        let content = std::fs::read_to_string(&path).map_err(|e| AttestorError::ContainerLookup {
            pid,
            reason: format!("unable to read {}: {e}", path.display()),
        })?;
        parse_cgroups(&content).map_err(|reason| AttestorError::ContainerLookup { pid, reason })
    }
}

/// Extracts the container identity from the text of a cgroup file.
///
/// Each line is `<hierarchy>:<controllers>:<path>`. Only kubepods paths are
/// considered; all of them must agree on the container ID.
pub fn parse_cgroups(content: &str) -> std::result::Result<Option<ContainerIdentity>, String> {
    let mut found: Option<ContainerIdentity> = None;

    for line in content.lines() {
        let Some(path) = line.splitn(3, ':').nth(2) else {
            continue;
        };
        if !path.contains("kubepods") {
            continue;
        }
        let Some(container_id) = path
            .rsplit('/')
            .next()
            .and_then(|segment| CONTAINER_ID_RE.captures(segment))
            .map(|captures| captures[1].to_string())
        else {
            continue;
        };
        let pod_uid = POD_UID_RE
            .captures(path)
            .map(|captures| captures[1].replace('_', "-"));

        match &found {
            Some(existing) if existing.container_id != container_id => {
                return Err(format!(
                    "multiple container IDs found in cgroups ({}, {container_id})",
                    existing.container_id
                ));
            }
            Some(_) => {}
            None => {
                found = Some(ContainerIdentity {
                    container_id,
                    pod_uid,
                })
            }
        }
    }

    Ok(found)
}
