//! Container image signature attestation
//!
//! Verifies the signatures attached to a container image and turns them into
//! workload selectors. Registry access and the cryptographic verification
//! itself are supplied by the caller through [`ManifestFetcher`] and
//! [`ImageVerifier`].
//!
//! # Example
//!
//! ```rust,ignore
//! use podwarden_sigstore::{AttestationPipeline, ContainerImage, RegistryManifestFetcher};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let pipeline = AttestationPipeline::new(10, Arc::new(RegistryManifestFetcher::new()), backend)?;
//! pipeline.add_skipped_images(["sha256:5fb2..."]);
//! let selectors = pipeline
//!     .attest_signatures(&container, &CancellationToken::new())
//!     .await?;
//! ```

pub mod cache;
#[cfg(feature = "cosign")]
pub mod cosign;
pub mod errors;
pub mod pipeline;
pub mod policy;
pub mod registry;
pub mod selectors;
pub mod signature;
pub mod subject;
pub mod verifier;

pub use oci_distribution::Reference;

pub use cache::{VerificationCache, DEFAULT_CACHE_CAPACITY};
#[cfg(feature = "cosign")]
pub use cosign::CosignVerifier;
pub use errors::{BoxError, Result, SigstoreError};
pub use pipeline::{AttestationPipeline, ContainerImage, VALIDATION_PASSED_SELECTOR};
pub use policy::{AllowList, SkipList};
pub use registry::RegistryManifestFetcher;
pub use selectors::{extract_bundle_content, SelectorExtractor, SelectorRecord};
pub use signature::{
    BundleSignature, CertificateSignature, PlainSignature, RekorBundle, RekorPayload, Signature,
    SignatureAccessError, SigningCertificate,
};
pub use subject::resolve_subject;
pub use verifier::{
    parse_image_reference, CheckOptions, ImageVerifier, ManifestFetcher, SignatureVerifier,
    VerifiedSignatures, VerifyFailure, DEFAULT_REKOR_URL,
};
