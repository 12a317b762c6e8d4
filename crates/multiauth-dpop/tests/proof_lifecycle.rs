//! End-to-end DPoP proof lifecycle tests
//!
//! These tests exercise a client-side generator against a server-side verifier:
//! - Single-use semantics within the replay window
//! - Expired `jti` entries never reopening a captured proof
//! - Isolation between keys sharing a `jti` namespace
//! - Replay caches shared between verifier instances

use std::sync::Arc;
use std::time::Duration;

use multiauth_dpop::{
    DpopError, DpopProofGenerator, DpopVerifier, DpopVerifierConfig, MemoryReplayCache,
    ProofContext,
};
use pretty_assertions::assert_eq;

const URI: &str = "https://mcp.example.com/mcp";

#[tokio::test]
async fn test_replay_rejected_within_window_and_stale_after() {
    // GIVEN: A verifier whose replay window just covers the accepted iat span
    let verifier = DpopVerifier::with_config(DpopVerifierConfig {
        max_clock_skew: Duration::from_secs(1),
        replay_window: Duration::from_secs(2),
        ..Default::default()
    })
    .unwrap();
    let generator = DpopProofGenerator::generate().unwrap();
    let proof = generator.generate_proof("POST", URI, Some("at")).unwrap();
    let context = ProofContext::new("POST", URI).with_access_token("at");

    // WHEN: The same proof is presented twice in quick succession
    let first = verifier.verify(proof.as_str(), &context).await;
    let second = verifier.verify(proof.as_str(), &context).await;

    // THEN: Only the first presentation is accepted
    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(DpopError::ReplayAttackDetected { .. })
    ));

    // WHEN: The window has passed and the jti has left the cache
    tokio::time::sleep(Duration::from_millis(2_200)).await;

    // THEN: The captured proof is too old to be replayed
    assert!(matches!(
        verifier.verify(proof.as_str(), &context).await,
        Err(DpopError::ClockSkewTooLarge { .. })
    ));

    // AND: A fresh proof from the same key is accepted
    let fresh = generator.generate_proof("POST", URI, Some("at")).unwrap();
    let verified = verifier.verify(fresh.as_str(), &context).await.unwrap();
    assert_eq!(verified.thumbprint, generator.thumbprint());
}

#[test]
fn test_short_replay_window_is_refused() {
    // A jti forgotten while its iat is still acceptable could be replayed
    let result = DpopVerifier::with_config(DpopVerifierConfig {
        replay_window: Duration::from_secs(1),
        ..Default::default()
    });
    assert!(matches!(
        result.unwrap_err(),
        DpopError::ConfigurationError { .. }
    ));
}

#[tokio::test]
async fn test_shared_replay_cache_spans_verifiers() {
    // GIVEN: Two verifier instances backed by one replay cache
    let cache = Arc::new(MemoryReplayCache::new());
    let a = DpopVerifier::new().with_replay_cache(cache.clone());
    let b = DpopVerifier::new().with_replay_cache(cache);

    let generator = DpopProofGenerator::generate().unwrap();
    let proof = generator.generate_proof("GET", URI, None).unwrap();
    let context = ProofContext::new("GET", URI);

    // WHEN/THEN: The proof is consumed by the first and rejected by the second
    assert!(a.verify(proof.as_str(), &context).await.is_ok());
    assert!(b.verify(proof.as_str(), &context).await.is_err());
}

#[tokio::test]
async fn test_distinct_proofs_from_same_key_are_independent() {
    let verifier = DpopVerifier::new();
    let generator = DpopProofGenerator::generate().unwrap();
    let context = ProofContext::new("GET", URI);

    for _ in 0..5 {
        let proof = generator.generate_proof("GET", URI, None).unwrap();
        assert!(verifier.verify(proof.as_str(), &context).await.is_ok());
    }
}

#[tokio::test]
async fn test_token_bound_to_key_rejects_other_key() {
    // GIVEN: A token bound to the client's key thumbprint
    let client = DpopProofGenerator::generate().unwrap();
    let attacker = DpopProofGenerator::generate().unwrap();
    let jkt = client.thumbprint().to_string();

    // WHEN: An attacker presents the stolen token with their own valid proof
    let proof = attacker.generate_proof("GET", URI, Some("stolen")).unwrap();
    let context = ProofContext::new("GET", URI)
        .with_access_token("stolen")
        .with_bound_thumbprint(&jkt);
    let result = DpopVerifier::new().verify(proof.as_str(), &context).await;

    // THEN: The binding check fails
    assert_eq!(result.unwrap_err(), DpopError::ThumbprintMismatch);
}
