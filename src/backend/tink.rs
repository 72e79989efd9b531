//! Tink-keyset-backed CA
//!
//! The signing key is stored as a Tink JSON keyset, AEAD-encrypted under a
//! KMS key. The AEAD itself is an oracle port; this module unwraps the
//! keyset, extracts the primary ECDSA P-256 key, and then signs locally
//! like the file backend.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use zeroize::Zeroize;

use super::local::LocalIssuer;
use super::{BackendError, CaChain, SigningBackend};
use crate::template::CertificateTemplate;

const ECDSA_PRIVATE_KEY_TYPE: &str = "type.googleapis.com/google.crypto.tink.EcdsaPrivateKey";

/// Port onto the AEAD that wraps the keyset (typically a KMS envelope key).
#[async_trait]
pub trait KeysetAead: Send + Sync {
    /// Decrypt `ciphertext` bound to `associated_data`.
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, BackendError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptedKeyset {
    encrypted_keyset: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Keyset {
    primary_key_id: u32,
    key: Vec<KeysetKey>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeysetKey {
    key_data: KeyData,
    status: String,
    key_id: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyData {
    type_url: String,
    value: String,
}

/// CA whose key is unwrapped from an encrypted Tink keyset at startup.
pub struct TinkCa {
    issuer: LocalIssuer,
}

impl TinkCa {
    /// Unwrap `encrypted_keyset_json` with `aead` and bind the primary key
    /// to `chain`.
    pub async fn load(
        encrypted_keyset_json: &str,
        aead: &dyn KeysetAead,
        chain: CaChain,
    ) -> Result<Self, BackendError> {
        let envelope: EncryptedKeyset = serde_json::from_str(encrypted_keyset_json)
            .map_err(|e| BackendError::KeyNotReady(format!("bad encrypted keyset: {e}")))?;
        let ciphertext = BASE64
            .decode(&envelope.encrypted_keyset)
            .map_err(|e| BackendError::KeyNotReady(format!("bad keyset base64: {e}")))?;

        let mut plaintext = aead.decrypt(&ciphertext, &[]).await?;
        let parsed: Result<Keyset, _> = serde_json::from_slice(&plaintext);
        plaintext.zeroize();
        let keyset =
            parsed.map_err(|e| BackendError::KeyNotReady(format!("bad keyset JSON: {e}")))?;

        let signing_key = primary_signing_key(&keyset)?;
        Ok(Self {
            issuer: LocalIssuer::new(signing_key, chain)?,
        })
    }
}

fn primary_signing_key(keyset: &Keyset) -> Result<p256::ecdsa::SigningKey, BackendError> {
    let primary = keyset
        .key
        .iter()
        .find(|k| k.key_id == keyset.primary_key_id && k.status == "ENABLED")
        .ok_or_else(|| BackendError::KeyNotReady("keyset has no enabled primary key".into()))?;
    if primary.key_data.type_url != ECDSA_PRIVATE_KEY_TYPE {
        return Err(BackendError::KeyNotReady(format!(
            "unsupported keyset key type {}",
            primary.key_data.type_url
        )));
    }
    let mut proto = BASE64
        .decode(&primary.key_data.value)
        .map_err(|e| BackendError::KeyNotReady(format!("bad key material base64: {e}")))?;

    // EcdsaPrivateKey proto: field 2 is the public key message, field 3 the
    // private scalar bytes.
    let scalar = proto_field_bytes(&proto, 3)
        .ok_or_else(|| BackendError::KeyNotReady("keyset key has no private scalar".into()))?;
    let key = scalar_to_key(scalar);
    proto.zeroize();
    key
}

fn scalar_to_key(scalar: &[u8]) -> Result<p256::ecdsa::SigningKey, BackendError> {
    // Proto bytes may carry a sign-padding zero or drop leading zeroes;
    // normalize to exactly 32 bytes.
    let trimmed: Vec<u8> = scalar.iter().copied().skip_while(|&b| b == 0).collect();
    if trimmed.len() > 32 {
        return Err(BackendError::KeyNotReady("scalar is wider than P-256".into()));
    }
    let mut padded = [0u8; 32];
    padded[32 - trimmed.len()..].copy_from_slice(&trimmed);
    let secret = p256::SecretKey::from_slice(&padded)
        .map_err(|_| BackendError::KeyNotReady("scalar is not a valid P-256 key".into()))?;
    padded.zeroize();
    Ok(p256::ecdsa::SigningKey::from(secret))
}

/// Return the bytes of the first length-delimited occurrence of `field` in
/// a protobuf message.
fn proto_field_bytes(mut buf: &[u8], field: u64) -> Option<&[u8]> {
    while !buf.is_empty() {
        let (tag, rest) = proto_varint(buf)?;
        buf = rest;
        let (field_no, wire_type) = (tag >> 3, tag & 0x7);
        match wire_type {
            0 => {
                let (_, rest) = proto_varint(buf)?;
                buf = rest;
            }
            1 => buf = buf.get(8..)?,
            2 => {
                let (len, rest) = proto_varint(buf)?;
                let len = usize::try_from(len).ok()?;
                if rest.len() < len {
                    return None;
                }
                if field_no == field {
                    return Some(&rest[..len]);
                }
                buf = &rest[len..];
            }
            5 => buf = buf.get(4..)?,
            _ => return None,
        }
    }
    None
}

fn proto_varint(buf: &[u8]) -> Option<(u64, &[u8])> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, &buf[i + 1..]));
        }
    }
    None
}

#[async_trait]
impl SigningBackend for TinkCa {
    async fn sign(&self, template: &CertificateTemplate) -> Result<Vec<u8>, BackendError> {
        self.issuer.sign_template(template)
    }

    fn chain(&self) -> &CaChain {
        self.issuer.chain()
    }
}
