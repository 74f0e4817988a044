//! Kubernetes workload attestation
//!
//! Resolves a process to the pod and container it runs in by polling the
//! kubelet, and emits `k8s` selectors describing them. When enabled, the
//! container image's signatures are verified through
//! [`podwarden_sigstore`] and contribute selectors of their own.
//!
//! ```rust,ignore
//! use podwarden::{AttestorDeps, K8sAttestor};
//! use podwarden_config::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::from_file("/etc/podwarden/config.toml")?;
//! let attestor = K8sAttestor::configure(&config, AttestorDeps::new())?;
//! for selector in attestor.attest(4242, &CancellationToken::new()).await? {
//!     println!("{selector}");
//! }
//! ```

pub mod attestor;
pub mod cgroup;
pub mod clock;
pub mod error;
pub mod kubelet;
pub mod locator;
pub mod pods;
pub mod scheduler;
pub mod selector;

pub use attestor::{AttestorDeps, EnvLookup, K8sAttestor, SigstoreBackend};
pub use cgroup::{ContainerIdResolver, ContainerIdentity, ProcCgroupResolver};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AttestorError, ErrorCode, Result};
pub use kubelet::{KubeletClient, TrustConfig};
pub use locator::{find_container, locate, PodMatch};
pub use scheduler::{PollScheduler, PollState};
pub use selector::{Selector, SELECTOR_TYPE};
