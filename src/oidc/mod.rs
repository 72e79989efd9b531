//! OIDC identity establishment
//!
//! Token verification, issuer registry, and JWKS caching. The output of
//! this module is a verified `Claims` set paired with the configured
//! `IssuerDescriptor` that decides how the identity is shaped into a
//! certificate (`identity` module).

pub mod jwks;
pub mod registry;
pub mod verifier;

pub use jwks::{FetchedKeys, JwksCache, KeySetFetcher, StaticKeys};
pub use registry::{IssuerDescriptor, IssuerRegistry, IssuerType, RegistryHandle};
pub use verifier::{Claims, OidcError, OidcVerifier};
