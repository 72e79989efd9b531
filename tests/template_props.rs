//! Property tests for template invariants and the SAN codec
//!
//! 1. Serial numbers are positive 159-bit values and never repeat across
//!    issuances.
//! 2. `not_after - not_before` never exceeds the configured lifetime plus
//!    backdate, and `now` is always covered.
//! 3. `unmarshal ∘ marshal` is the identity on valid username identities.

use proptest::prelude::*;

use signet_ca::config::PolicyConfig;
use signet_ca::identity::email::EmailPrincipal;
use signet_ca::identity::username::{marshal_username_san, unmarshal_username_san};
use signet_ca::identity::Principal;
use signet_ca::template::CertificateTemplate;

fn test_spki() -> Vec<u8> {
    use spki::EncodePublicKey;
    p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng)
        .verifying_key()
        .to_public_key_der()
        .unwrap()
        .as_bytes()
        .to_vec()
}

fn email_principal(email: &str) -> Principal {
    Principal::Email(EmailPrincipal {
        email: email.to_string(),
        issuer: "https://accounts.google.com".to_string(),
    })
}

/// Printable identities without the scoping delimiter.
fn arb_username() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9._-]{1,40}").unwrap()
}

fn arb_domain() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,20}\\.[a-z]{2,6}").unwrap()
}

/// Lifetimes from one minute to one day, backdates up to ten minutes.
fn arb_policy() -> impl Strategy<Value = PolicyConfig> {
    (60u64..86_400, 0u64..600).prop_map(|(lifetime_seconds, backdate_seconds)| PolicyConfig {
        lifetime_seconds,
        backdate_seconds,
    })
}

proptest! {
    #[test]
    fn username_san_round_trips(username in arb_username(), domain in arb_domain()) {
        let identity = format!("{username}!{domain}");
        let der = marshal_username_san(&identity).unwrap();
        prop_assert_eq!(unmarshal_username_san(&der).unwrap(), identity);
    }

    #[test]
    fn validity_respects_policy(policy in arb_policy()) {
        let now = chrono::Utc::now();
        let template = CertificateTemplate::build(
            &email_principal("alice@example.com"),
            test_spki(),
            now,
            &policy,
        )
        .unwrap();
        let total = (template.not_after - template.not_before).num_seconds() as u64;
        prop_assert!(total <= policy.lifetime_seconds + policy.backdate_seconds);
        prop_assert!(template.not_before <= now);
        prop_assert!(now <= template.not_after);
    }
}

#[test]
fn serials_are_positive_and_unique() {
    let spki = test_spki();
    let principal = email_principal("alice@example.com");
    let policy = PolicyConfig::default();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..256 {
        let template = CertificateTemplate::build(
            &principal,
            spki.clone(),
            chrono::Utc::now(),
            &policy,
        )
        .unwrap();
        assert_eq!(template.serial.len(), 20);
        assert_eq!(template.serial[0] & 0x80, 0);
        assert!(template.serial.iter().any(|&b| b != 0));
        assert!(seen.insert(template.serial), "serial repeated");
    }
}

#[test]
fn unicode_identities_survive_the_codec_byte_exact() {
    for identity in ["ü!example.com", "名前!example.jp", "a\u{0301}!example.com"] {
        let der = marshal_username_san(identity).unwrap();
        let parsed = unmarshal_username_san(&der).unwrap();
        // Byte-exact: no normalization anywhere in the path.
        assert_eq!(parsed.as_bytes(), identity.as_bytes());
    }
}
