//! Signer subject resolution

use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::signature::{Signature, SigningCertificate};

const MAX_SUBJECT_LEN: usize = 1024;

#[derive(Debug, Deserialize)]
struct SimpleSigningPayload {
    #[serde(default)]
    optional: Option<HashMap<String, serde_json::Value>>,
}

/// Resolve the signer subject of `signature`.
///
/// Precedence: payload `optional.subject`, then the certificate's first email
/// address, then its first URI. Unreadable capabilities are skipped. Returns an
/// empty string when nothing usable is found.
pub fn resolve_subject(signature: &dyn Signature) -> String {
    match signature.payload() {
        Ok(payload) => {
            if let Some(subject) = payload_subject(payload) {
                return subject;
            }
        }
        Err(err) => debug!(error = %err, "Skipping payload during subject resolution"),
    }

    match signature.cert() {
        Ok(Some(cert)) => certificate_subject(cert).unwrap_or_default(),
        Ok(None) => String::new(),
        Err(err) => {
            debug!(error = %err, "Skipping certificate during subject resolution");
            String::new()
        }
    }
}

/// `optional.subject` from a simple signing payload, if well formed
pub fn payload_subject(payload: &[u8]) -> Option<String> {
    let parsed: SimpleSigningPayload = match serde_json::from_slice(payload) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(error = %err, "Signature payload is not valid JSON");
            return None;
        }
    };

    let subject = parsed.optional?.remove("subject")?;
    match subject.as_str() {
        Some(subject) if is_well_formed_subject(subject) => Some(subject.to_string()),
        _ => {
            debug!("Ignoring malformed payload subject");
            None
        }
    }
}

/// First email address, else the first URI with any leading `//` removed.
pub fn certificate_subject(cert: &SigningCertificate) -> Option<String> {
    if let Some(email) = cert.email_addresses.iter().find(|e| !e.is_empty()) {
        return Some(email.clone());
    }
    cert.uris
        .iter()
        .map(|uri| uri.trim_start_matches("//"))
        .find(|uri| !uri.is_empty())
        .map(str::to_string)
}

/// Reject empty, oversized, control-character or whitespace-bearing subjects.
pub fn is_well_formed_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject.len() <= MAX_SUBJECT_LEN
        && !subject
            .chars()
            .any(|c| c.is_control() || c.is_whitespace() || c == '\u{fffd}')
}
