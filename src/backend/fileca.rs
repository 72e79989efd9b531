//! File-backed CA
//!
//! Loads a persistent chain and PKCS#8 signing key from disk. Encrypted
//! keys (`ENCRYPTED PRIVATE KEY`) are unlocked with a password that is
//! held behind `secrecy` and never logged; plaintext keys are accepted for
//! development setups.

use async_trait::async_trait;
use der::Decode;
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo};
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;

use super::local::LocalIssuer;
use super::{BackendError, CaChain, SigningBackend};
use crate::template::CertificateTemplate;

/// Persistent CA loaded from disk.
pub struct FileCa {
    issuer: LocalIssuer,
}

impl FileCa {
    /// Load the chain and signing key. `password` is required when the key
    /// file holds an encrypted PKCS#8 blob.
    pub fn load(
        chain_path: &Path,
        key_path: &Path,
        password: Option<SecretString>,
    ) -> Result<Self, BackendError> {
        let chain_pem = std::fs::read_to_string(chain_path)
            .map_err(|e| BackendError::KeyNotReady(format!("chain unreadable: {e}")))?;
        let chain = CaChain::from_pem(&chain_pem)?;

        let key_pem = std::fs::read_to_string(key_path)
            .map_err(|e| BackendError::KeyNotReady(format!("key unreadable: {e}")))?;
        let signing_key = decode_signing_key(&key_pem, password.as_ref())?;

        Ok(Self {
            issuer: LocalIssuer::new(signing_key, chain)?,
        })
    }
}

fn decode_signing_key(
    key_pem: &str,
    password: Option<&SecretString>,
) -> Result<p256::ecdsa::SigningKey, BackendError> {
    let block = pem::parse(key_pem)
        .map_err(|e| BackendError::KeyNotReady(format!("bad key PEM: {e}")))?;
    let plaintext_der = match block.tag() {
        "ENCRYPTED PRIVATE KEY" => {
            let password = password.ok_or_else(|| {
                BackendError::KeyNotReady("encrypted key requires a password".into())
            })?;
            let encrypted = EncryptedPrivateKeyInfo::from_der(block.contents())
                .map_err(|e| BackendError::KeyNotReady(format!("bad encrypted key: {e}")))?;
            let document = encrypted
                .decrypt(password.expose_secret())
                .map_err(|_| BackendError::KeyNotReady("key password is incorrect".into()))?;
            document.as_bytes().to_vec()
        }
        "PRIVATE KEY" => block.contents().to_vec(),
        other => {
            return Err(BackendError::KeyNotReady(format!(
                "unexpected key PEM label {other}"
            )))
        }
    };

    let info = PrivateKeyInfo::from_der(&plaintext_der)
        .map_err(|e| BackendError::KeyNotReady(format!("bad PKCS#8 key: {e}")))?;
    let secret = p256::SecretKey::try_from(info)
        .map_err(|_| BackendError::KeyNotReady("signing key is not an ECDSA P-256 key".into()))?;
    Ok(p256::ecdsa::SigningKey::from(secret))
}

#[async_trait]
impl SigningBackend for FileCa {
    async fn sign(&self, template: &CertificateTemplate) -> Result<Vec<u8>, BackendError> {
        self.issuer.sign_template(template)
    }

    fn chain(&self) -> &CaChain {
        self.issuer.chain()
    }
}

#[cfg(test)]
mod tests {
    use super::super::local::{build_ca_certificate, validity_years, CaCertParams};
    use super::*;
    use core::str::FromStr;
    use p256::pkcs8::EncodePrivateKey;
    use rand::rngs::OsRng;
    use spki::EncodePublicKey;
    use x509_cert::name::Name;

    fn write_ca_files(
        dir: &tempfile::TempDir,
        encrypt_with: Option<&str>,
    ) -> (std::path::PathBuf, std::path::PathBuf) {
        let secret = p256::SecretKey::random(&mut OsRng);
        let key = p256::ecdsa::SigningKey::from(&secret);
        let name = Name::from_str("CN=file test root,O=signet-ca").unwrap();
        let spki = key
            .verifying_key()
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec();
        let cert = build_ca_certificate(
            &CaCertParams {
                subject: &name,
                issuer: &name,
                spki_der: &spki,
                path_len: 0,
                validity: validity_years(1).unwrap(),
                issuer_key_id: None,
            },
            &key,
        )
        .unwrap();

        let chain_path = dir.path().join("chain.pem");
        std::fs::write(&chain_path, pem::encode(&pem::Pem::new("CERTIFICATE", cert))).unwrap();

        let key_path = dir.path().join("key.pem");
        let key_pem = match encrypt_with {
            Some(password) => secret
                .to_pkcs8_encrypted_pem(&mut OsRng, password.as_bytes(), Default::default())
                .unwrap()
                .to_string(),
            None => secret
                .to_pkcs8_pem(Default::default())
                .unwrap()
                .to_string(),
        };
        std::fs::write(&key_path, key_pem).unwrap();
        (chain_path, key_path)
    }

    #[test]
    fn loads_plaintext_key() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, key) = write_ca_files(&dir, None);
        let ca = FileCa::load(&chain, &key, None).unwrap();
        assert_eq!(ca.chain().certs().len(), 1);
    }

    #[test]
    fn unlocks_encrypted_key_with_password() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, key) = write_ca_files(&dir, Some("hunter2"));
        assert!(FileCa::load(&chain, &key, None).is_err());
        let wrong = FileCa::load(&chain, &key, Some(SecretString::from("wrong")));
        assert!(matches!(wrong, Err(BackendError::KeyNotReady(_))));
        FileCa::load(&chain, &key, Some(SecretString::from("hunter2"))).unwrap();
    }
}
