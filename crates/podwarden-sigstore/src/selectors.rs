//! Selector extraction from verified signatures

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::errors::{Result, SigstoreError};
use crate::policy::AllowList;
use crate::signature::{RekorBundle, Signature};
use crate::subject::resolve_subject;

/// Identity facts extracted from one signature
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorRecord {
    pub subject: Option<String>,
    pub content: Option<String>,
    pub log_id: Option<String>,
    pub integrated_time: Option<String>,
}

impl SelectorRecord {
    pub fn is_empty(&self) -> bool {
        self.subject.is_none()
            && self.content.is_none()
            && self.log_id.is_none()
            && self.integrated_time.is_none()
    }

    /// Render as `<container>:image-signature-*` selector values
    pub fn to_selector_values(&self, container_id: &str) -> Vec<String> {
        let fields = [
            ("subject", &self.subject),
            ("content", &self.content),
            ("logid", &self.log_id),
            ("integrated-time", &self.integrated_time),
        ];
        fields
            .into_iter()
            .filter_map(|(name, value)| {
                value
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .map(|v| format!("{container_id}:image-signature-{name}:{v}"))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RekorEntryBody {
    spec: Option<RekorEntrySpec>,
}

#[derive(Debug, Deserialize)]
struct RekorEntrySpec {
    signature: Option<RekorEntrySignature>,
}

#[derive(Debug, Deserialize)]
struct RekorEntrySignature {
    content: Option<String>,
}

/// Decode the signature content recorded in a transparency log bundle.
pub fn extract_bundle_content(bundle: Option<&RekorBundle>) -> Result<String> {
    let bundle = bundle.ok_or_else(|| SigstoreError::MalformedBundle("bundle is missing".into()))?;

    let body = bundle.payload.body.as_str().ok_or_else(|| {
        SigstoreError::MalformedBundle("bundle body is not a string".into())
    })?;

    let decoded = general_purpose::STANDARD
        .decode(body)
        .map_err(|e| SigstoreError::MalformedBundle(format!("failed to decode bundle body: {e}")))?;

    let entry: RekorEntryBody = serde_json::from_slice(&decoded)
        .map_err(|e| SigstoreError::MalformedBundle(format!("failed to parse bundle body: {e}")))?;

    let content = entry
        .spec
        .and_then(|spec| spec.signature)
        .and_then(|signature| signature.content)
        .ok_or_else(|| SigstoreError::MalformedBundle("bundle has no signature content".into()))?;

    if content.is_empty() {
        return Err(SigstoreError::MalformedBundle(
            "bundle signature content is empty".into(),
        ));
    }
    Ok(content)
}

/// Builds selector records and applies the subject allow-list
#[derive(Debug, Clone)]
pub struct SelectorExtractor {
    allow_list: Arc<AllowList>,
}

impl SelectorExtractor {
    pub fn new(allow_list: Arc<AllowList>) -> Self {
        Self { allow_list }
    }

    /// Record for one signature, subject to the allow-list.
    pub fn selector_from_signature(
        &self,
        signature: &dyn Signature,
        container_id: &str,
    ) -> Option<SelectorRecord> {
        let record = record_from_signature(signature, container_id)?;
        let subject = record.subject.as_deref().unwrap_or_default();
        if !self.allow_list.permits(subject) {
            debug!(container_id, subject, "Subject not in allowed subjects list");
            return None;
        }
        Some(record)
    }

    /// Records for `signatures` in input order. Allow-list is not applied.
    pub fn extract_selectors(
        &self,
        signatures: &[Arc<dyn Signature>],
        container_id: &str,
    ) -> Vec<SelectorRecord> {
        signatures
            .iter()
            .filter_map(|signature| record_from_signature(signature.as_ref(), container_id))
            .collect()
    }

    pub fn apply_allow_list(&self, records: Vec<SelectorRecord>) -> Vec<SelectorRecord> {
        if !self.allow_list.is_enabled() {
            return records;
        }
        records
            .into_iter()
            .filter(|record| {
                self.allow_list
                    .permits(record.subject.as_deref().unwrap_or_default())
            })
            .collect()
    }
}

/// A signature without a resolvable subject yields no record.
fn record_from_signature(signature: &dyn Signature, container_id: &str) -> Option<SelectorRecord> {
    let subject = resolve_subject(signature);
    if subject.is_empty() {
        debug!(container_id, "Signature has no resolvable subject");
        return None;
    }

    let mut record = SelectorRecord {
        subject: Some(subject),
        ..Default::default()
    };

    match signature.bundle() {
        Ok(Some(bundle)) => {
            match extract_bundle_content(Some(bundle)) {
                Ok(content) => record.content = Some(content),
                Err(err) => debug!(container_id, error = %err, "Omitting bundle content"),
            }
            if !bundle.payload.log_id.is_empty() {
                record.log_id = Some(bundle.payload.log_id.clone());
            }
            record.integrated_time = Some(bundle.payload.integrated_time.to_string());
        }
        Ok(None) => {}
        Err(err) => debug!(container_id, error = %err, "Omitting bundle fields"),
    }

    Some(record)
}
