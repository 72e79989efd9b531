//! Reference adapters for HTTP-backed collaborators
//!
//! The core consumes the `KeySetFetcher` and `CtLogClient` ports; these
//! adapters are the stock implementations over `reqwest`. Deployments with
//! their own transport stack replace them without touching the core.

pub mod http_ctlog;
pub mod http_jwks;

pub use http_ctlog::HttpCtLog;
pub use http_jwks::HttpKeySetFetcher;
