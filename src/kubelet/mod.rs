//! Kubelet access: trust modes, the pod-list client and credential reload

pub mod client;
pub mod reload;
pub mod trust;
pub mod verifier;

pub use client::KubeletClient;
pub use reload::{spawn_reload, ClientHandle};
pub use trust::{CredentialSource, KubeletMode, SecureTrust, ServerVerification, TrustConfig};
pub use verifier::{AcceptAnyServerCert, CaChainVerifier};
