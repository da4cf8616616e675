//! Usage: PKCE verifier/challenge generation (RFC 7636, S256) for one authorization attempt.

use crate::shared::security::random_urlsafe;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

pub const CODE_CHALLENGE_METHOD: &str = "S256";

// 64 random bytes encode to an 86 character verifier, inside RFC 7636's 43..=128.
const VERIFIER_ENTROPY_BYTES: usize = 64;

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
}

/// Fresh verifier from the OS RNG on every call; verifiers are never reused.
pub fn generate_pkce_pair() -> PkcePair {
    let code_verifier = random_urlsafe(VERIFIER_ENTROPY_BYTES);
    let code_challenge = code_challenge_s256(&code_verifier);

    PkcePair {
        code_verifier,
        code_challenge,
    }
}

pub fn code_challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
