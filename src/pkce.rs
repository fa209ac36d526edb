use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generates a PKCE code verifier: 48 random bytes, base64url (64 chars).
#[must_use]
pub fn generate_code_verifier() -> String {
    random_urlsafe::<48>()
}

/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generates the `state` parameter binding a callback to its login request.
#[must_use]
pub fn generate_state() -> String {
    random_urlsafe::<16>()
}

/// Generates the OIDC `nonce` echoed back inside the ID token.
#[must_use]
pub fn generate_nonce() -> String {
    random_urlsafe::<24>()
}

fn random_urlsafe<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
