//! Signature model
//!
//! A verified image signature exposes a fixed set of capabilities. Each
//! accessor can fail on its own; a failing certificate does not make the
//! payload or bundle unusable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A signature capability could not be read
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("signature {capability} unavailable: {reason}")]
pub struct SignatureAccessError {
    pub capability: &'static str,
    pub reason: String,
}

impl SignatureAccessError {
    pub fn new(capability: &'static str, reason: impl Into<String>) -> Self {
        Self {
            capability,
            reason: reason.into(),
        }
    }
}

pub type SignatureResult<T> = std::result::Result<T, SignatureAccessError>;

/// Capabilities of a verified image signature
pub trait Signature: Send + Sync + fmt::Debug {
    /// Signed payload bytes (simple signing JSON)
    fn payload(&self) -> SignatureResult<&[u8]>;

    /// Signing certificate, if the signature is certificate backed
    fn cert(&self) -> SignatureResult<Option<&SigningCertificate>>;

    /// Intermediate certificates
    fn chain(&self) -> SignatureResult<&[SigningCertificate]>;

    /// Transparency log bundle, if the signature was logged
    fn bundle(&self) -> SignatureResult<Option<&RekorBundle>>;

    fn annotations(&self) -> SignatureResult<&BTreeMap<String, String>>;

    fn base64_signature(&self) -> SignatureResult<&str>;
}

/// Identity fields extracted from a signing certificate's SAN extension
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningCertificate {
    pub email_addresses: Vec<String>,
    /// URI SANs in their textual form
    pub uris: Vec<String>,
}

impl SigningCertificate {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email_addresses: vec![email.into()],
            uris: Vec::new(),
        }
    }

    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            email_addresses: Vec::new(),
            uris: vec![uri.into()],
        }
    }
}

/// Rekor transparency log entry attached to a signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RekorBundle {
    #[serde(rename = "SignedEntryTimestamp", default)]
    pub signed_entry_timestamp: String,
    #[serde(rename = "Payload")]
    pub payload: RekorPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RekorPayload {
    /// Base64 encoded log entry. Kept untyped; a non-string body is malformed.
    pub body: serde_json::Value,
    #[serde(rename = "integratedTime")]
    pub integrated_time: i64,
    #[serde(rename = "logIndex", default)]
    pub log_index: i64,
    #[serde(rename = "logID")]
    pub log_id: String,
}

impl RekorBundle {
    pub fn new(body: impl Into<serde_json::Value>, log_id: impl Into<String>, integrated_time: i64) -> Self {
        Self {
            signed_entry_timestamp: String::new(),
            payload: RekorPayload {
                body: body.into(),
                integrated_time,
                log_index: 0,
                log_id: log_id.into(),
            },
        }
    }
}

/// Payload-only signature
#[derive(Debug, Clone, Default)]
pub struct PlainSignature {
    pub payload: Vec<u8>,
    pub base64_signature: String,
    pub annotations: BTreeMap<String, String>,
}

impl PlainSignature {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }
}

impl Signature for PlainSignature {
    fn payload(&self) -> SignatureResult<&[u8]> {
        Ok(&self.payload)
    }

    fn cert(&self) -> SignatureResult<Option<&SigningCertificate>> {
        Ok(None)
    }

    fn chain(&self) -> SignatureResult<&[SigningCertificate]> {
        Ok(&[])
    }

    fn bundle(&self) -> SignatureResult<Option<&RekorBundle>> {
        Ok(None)
    }

    fn annotations(&self) -> SignatureResult<&BTreeMap<String, String>> {
        Ok(&self.annotations)
    }

    fn base64_signature(&self) -> SignatureResult<&str> {
        Ok(&self.base64_signature)
    }
}

/// Keyless signature carrying a signing certificate
#[derive(Debug, Clone, Default)]
pub struct CertificateSignature {
    pub plain: PlainSignature,
    pub certificate: SigningCertificate,
    pub chain: Vec<SigningCertificate>,
}

impl CertificateSignature {
    pub fn new(payload: impl Into<Vec<u8>>, certificate: SigningCertificate) -> Self {
        Self {
            plain: PlainSignature::new(payload),
            certificate,
            chain: Vec::new(),
        }
    }
}

impl Signature for CertificateSignature {
    fn payload(&self) -> SignatureResult<&[u8]> {
        self.plain.payload()
    }

    fn cert(&self) -> SignatureResult<Option<&SigningCertificate>> {
        Ok(Some(&self.certificate))
    }

    fn chain(&self) -> SignatureResult<&[SigningCertificate]> {
        Ok(&self.chain)
    }

    fn bundle(&self) -> SignatureResult<Option<&RekorBundle>> {
        Ok(None)
    }

    fn annotations(&self) -> SignatureResult<&BTreeMap<String, String>> {
        self.plain.annotations()
    }

    fn base64_signature(&self) -> SignatureResult<&str> {
        self.plain.base64_signature()
    }
}

/// Signature recorded in the transparency log
#[derive(Debug, Clone)]
pub struct BundleSignature {
    pub plain: PlainSignature,
    pub certificate: Option<SigningCertificate>,
    pub chain: Vec<SigningCertificate>,
    pub bundle: RekorBundle,
}

impl BundleSignature {
    pub fn new(payload: impl Into<Vec<u8>>, bundle: RekorBundle) -> Self {
        Self {
            plain: PlainSignature::new(payload),
            certificate: None,
            chain: Vec::new(),
            bundle,
        }
    }

    pub fn with_certificate(mut self, certificate: SigningCertificate) -> Self {
        self.certificate = Some(certificate);
        self
    }
}

impl Signature for BundleSignature {
    fn payload(&self) -> SignatureResult<&[u8]> {
        self.plain.payload()
    }

    fn cert(&self) -> SignatureResult<Option<&SigningCertificate>> {
        Ok(self.certificate.as_ref())
    }

    fn chain(&self) -> SignatureResult<&[SigningCertificate]> {
        Ok(&self.chain)
    }

    fn bundle(&self) -> SignatureResult<Option<&RekorBundle>> {
        Ok(Some(&self.bundle))
    }

    fn annotations(&self) -> SignatureResult<&BTreeMap<String, String>> {
        self.plain.annotations()
    }

    fn base64_signature(&self) -> SignatureResult<&str> {
        self.plain.base64_signature()
    }
}
