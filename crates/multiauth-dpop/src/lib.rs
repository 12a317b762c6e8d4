//! # Multiauth DPoP - RFC 9449 Proof-of-Possession
//!
//! DPoP (Demonstrating Proof-of-Possession) binds an access token to a key pair held by
//! the client. Every request carries a fresh, signed proof over the HTTP method and URI,
//! so a stolen token is useless without the private key.
//!
//! ## Core Features
//!
//! - **Proof generation** - ES256 (ECDSA P-256) proofs with `htm`, `htu`, `iat`, `jti`, `ath`
//! - **Proof verification** - signature, thumbprint binding, HTTP binding, clock skew,
//!   access-token hash and replay checks, in that order
//! - **Replay protection** - atomic insert-if-absent cache keyed by `(thumbprint, jti)` with
//!   time-windowed eviction
//!
//! ## Architecture
//!
//! - [`errors`] - DPoP-specific error types
//! - [`types`] - Algorithms, key pairs, claims and proofs
//! - [`helpers`] - JWK conversions, URI normalization and hashing
//! - [`proof`] - Client-side proof generation
//! - [`replay`] - Replay cache trait and in-memory implementation
//! - [`verifier`] - Server-side proof verification
//!
//! ## Example
//!
//! ```rust
//! use multiauth_dpop::{DpopKeyPair, DpopProofGenerator, DpopVerifier, ProofContext};
//!
//! # tokio_test::block_on(async {
//! let generator = DpopProofGenerator::new(DpopKeyPair::generate_p256()?);
//! let proof = generator.generate_proof("GET", "https://api.example.com/data", Some("token"))?;
//!
//! let verifier = DpopVerifier::new();
//! let context = ProofContext::new("GET", "https://api.example.com/data").with_access_token("token");
//! let verified = verifier.verify(proof.as_str(), &context).await?;
//! assert_eq!(verified.thumbprint, generator.thumbprint());
//! # Ok::<(), multiauth_dpop::DpopError>(())
//! # }).unwrap();
//! ```

pub mod errors;
pub mod helpers;
pub mod proof;
pub mod replay;
pub mod types;
pub mod verifier;

pub use errors::*;
pub use proof::DpopProofGenerator;
pub use replay::{MemoryReplayCache, ReplayCache};
pub use types::*;
pub use verifier::{DpopVerifier, DpopVerifierConfig, ProofContext, VerifiedProof};

/// DPoP result type
pub type Result<T> = std::result::Result<T, DpopError>;

/// DPoP JWT header type as defined in RFC 9449
pub const DPOP_JWT_TYPE: &str = "dpop+jwt";

/// HTTP header carrying the proof
pub const DPOP_HEADER: &str = "DPoP";

/// Default clock skew tolerance applied to `iat` in both directions (5 minutes)
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 300;

/// Default replay window; covers a proof's full acceptance window on both sides of `iat`
pub const DEFAULT_REPLAY_WINDOW_SECONDS: u64 = 600;
