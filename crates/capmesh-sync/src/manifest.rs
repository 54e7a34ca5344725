//! Wire types exchanged between peers.
//!
//! Field names are part of the protocol (camelCase, see the API surface in
//! the server module) and must not change between releases.

use serde::{Deserialize, Serialize};

use capmesh_core::{
    manifest_signing_bytes, Ed25519PublicKey, Ed25519Signature, InstanceId, Keypair, Record,
};

use crate::error::{Result, SyncError};

/// Message size limits.
pub mod limits {
    /// Max records carried in one manifest. Oversized pushes are rejected
    /// whole rather than truncated.
    pub const MAX_RECORDS_PER_MANIFEST: usize = 500;
}

/// A batch of records exchanged in one push request.
///
/// `since` is the watermark the sender used to compute the delta; it is
/// informational for the receiver. `senderKey`/`signature` carry the
/// optional authentication layer: the signature covers the canonical bytes
/// of `records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncManifest {
    pub sender_instance_id: InstanceId,

    /// Reachable address of the sender, for self-registration on first
    /// contact. Absent when the sender does not accept connections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_endpoint: Option<String>,

    pub since: i64,
    pub records: Vec<Record>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_key: Option<Ed25519PublicKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Ed25519Signature>,
}

impl SyncManifest {
    /// Build an unsigned manifest.
    pub fn new(sender: InstanceId, since: i64, records: Vec<Record>) -> Self {
        Self {
            sender_instance_id: sender,
            sender_endpoint: None,
            since,
            records,
            sender_key: None,
            signature: None,
        }
    }

    /// Attach the sender's reachable address.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.sender_endpoint = Some(endpoint.into());
        self
    }

    /// Sign the record batch with the sender's keypair.
    pub fn sign(mut self, keypair: &Keypair) -> Result<Self> {
        let bytes = manifest_signing_bytes(&self.records)
            .map_err(|e| SyncError::InvalidManifest(e.to_string()))?;
        self.sender_key = Some(keypair.public_key());
        self.signature = Some(keypair.sign(&bytes));
        Ok(self)
    }

    /// Verify the signature over the record batch.
    ///
    /// Fails when either the key or the signature is absent; callers gate
    /// this on their signature policy.
    pub fn verify_signature(&self) -> Result<()> {
        let key = self
            .sender_key
            .ok_or_else(|| SyncError::SignatureRejected("manifest is unsigned".into()))?;
        let signature = self
            .signature
            .ok_or_else(|| SyncError::SignatureRejected("manifest is unsigned".into()))?;

        let bytes = manifest_signing_bytes(&self.records)
            .map_err(|e| SyncError::InvalidManifest(e.to_string()))?;
        key.verify(&bytes, &signature)
            .map_err(|e| SyncError::SignatureRejected(e.to_string()))
    }

    /// Check structural limits.
    pub fn validate_limits(&self) -> Result<()> {
        if self.records.len() > limits::MAX_RECORDS_PER_MANIFEST {
            return Err(SyncError::InvalidManifest(format!(
                "manifest carries {} records, limit is {}",
                self.records.len(),
                limits::MAX_RECORDS_PER_MANIFEST
            )));
        }
        Ok(())
    }
}

/// Per-push tallies: the only externally visible outcome of a push.
///
/// Always returned, even when every record was rejected or superseded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSummary {
    /// Records that won resolution and were applied.
    pub accepted: usize,
    /// Records that failed validation.
    pub rejected: usize,
    /// Records that lost resolution (or were duplicates). Not an error.
    pub superseded: usize,
}

impl PushSummary {
    /// Total records the peer examined.
    pub fn total(&self) -> usize {
        self.accepted + self.rejected + self.superseded
    }

    /// Fold another summary into this one (chunked pushes).
    pub fn absorb(&mut self, other: PushSummary) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.superseded += other.superseded;
    }
}

/// Handshake response: who the peer is and how far its store has advanced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityDocument {
    pub instance_id: InstanceId,
    pub instance_type: String,
    pub high_water_mark: i64,
}

/// Response to a pull: the callee's delta since the requested watermark.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub sender_instance_id: InstanceId,
    pub records: Vec<Record>,
}

/// Discovery datagram broadcast on the local segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub instance_id: InstanceId,
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(key: &str) -> Record {
        Record {
            key: key.into(),
            payload: json!({"k": key}),
            version: 1,
            updated_at: 1000,
            origin_instance: InstanceId::from_string("aa".into()),
        }
    }

    fn sender() -> InstanceId {
        InstanceId::from_string("feedface".into())
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let keypair = Keypair::from_seed(&[7; 32]);
        let manifest = SyncManifest::new(sender(), 0, vec![record("x")])
            .sign(&keypair)
            .unwrap();

        manifest.verify_signature().unwrap();
    }

    #[test]
    fn test_verify_rejects_unsigned() {
        let manifest = SyncManifest::new(sender(), 0, vec![record("x")]);
        assert!(matches!(
            manifest.verify_signature(),
            Err(SyncError::SignatureRejected(_))
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_batch() {
        let keypair = Keypair::from_seed(&[7; 32]);
        let mut manifest = SyncManifest::new(sender(), 0, vec![record("x")])
            .sign(&keypair)
            .unwrap();

        manifest.records[0].version = 99;
        assert!(matches!(
            manifest.verify_signature(),
            Err(SyncError::SignatureRejected(_))
        ));
    }

    #[test]
    fn test_signature_survives_json_roundtrip() {
        let keypair = Keypair::from_seed(&[9; 32]);
        let manifest = SyncManifest::new(sender(), 42, vec![record("x"), record("y")])
            .sign(&keypair)
            .unwrap();

        let json = serde_json::to_string(&manifest).unwrap();
        let back: SyncManifest = serde_json::from_str(&json).unwrap();
        back.verify_signature().unwrap();
        assert_eq!(back.since, 42);
    }

    #[test]
    fn test_limits_enforced() {
        let records = (0..=limits::MAX_RECORDS_PER_MANIFEST)
            .map(|i| record(&format!("k{}", i)))
            .collect();
        let manifest = SyncManifest::new(sender(), 0, records);
        assert!(manifest.validate_limits().is_err());
    }

    #[test]
    fn test_wire_field_names() {
        let manifest = SyncManifest::new(sender(), 0, vec![]).with_endpoint("http://h:1");
        let v = serde_json::to_value(&manifest).unwrap();
        assert!(v.get("senderInstanceId").is_some());
        assert!(v.get("senderEndpoint").is_some());
        // Unsigned manifests omit the signature fields entirely.
        assert!(v.get("signature").is_none());
    }
}
