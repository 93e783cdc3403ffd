//! Webhook push signature verification.
//!
//! The provider signs the raw request body with the subscription secret and
//! sends `signature: <algorithm>=<hexDigest>`, e.g.
//! `sha256=a24a2e58912f4708f21eb043def1b1bcc0684b81a2e3feebe04ca558ff9830ce`.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use tracing::warn;

/// Digest functions accepted in the signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    /// Resolve an algorithm from its header name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Header name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

/// Verify a signature header against the raw payload.
///
/// Returns `false` for any malformed header (no `=`, unknown algorithm,
/// digest that is not hex) instead of failing the caller. The digest is
/// hex-decoded before comparison, so its case does not matter, and the
/// comparison itself runs in constant time.
pub fn validate_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let (algorithm_name, hex_digest) = match signature_header.split_once('=') {
        Some(parts) => parts,
        None => {
            warn!(header_length = signature_header.len(), "signature_header_malformed");
            return false;
        }
    };

    let algorithm = match SignatureAlgorithm::from_name(algorithm_name) {
        Some(a) => a,
        None => {
            warn!(algorithm = %algorithm_name, "signature_algorithm_unsupported");
            return false;
        }
    };

    let digest = match hex::decode(hex_digest.trim()) {
        Ok(d) => d,
        Err(_) => {
            warn!(algorithm = algorithm.name(), "signature_digest_not_hex");
            return false;
        }
    };

    let valid = match algorithm {
        SignatureAlgorithm::Sha1 => verify::<Hmac<Sha1>>(secret, payload, &digest),
        SignatureAlgorithm::Sha256 => verify::<Hmac<Sha256>>(secret, payload, &digest),
        SignatureAlgorithm::Sha384 => verify::<Hmac<Sha384>>(secret, payload, &digest),
        SignatureAlgorithm::Sha512 => verify::<Hmac<Sha512>>(secret, payload, &digest),
    };

    if !valid {
        warn!(
            algorithm = algorithm.name(),
            digest_length = digest.len(),
            "signature_mismatch"
        );
    }

    valid
}

/// Render the signature header value the provider would send for `payload`.
pub fn sign_payload(secret: &str, payload: &[u8], algorithm: SignatureAlgorithm) -> String {
    let digest = match algorithm {
        SignatureAlgorithm::Sha1 => compute::<Hmac<Sha1>>(secret, payload),
        SignatureAlgorithm::Sha256 => compute::<Hmac<Sha256>>(secret, payload),
        SignatureAlgorithm::Sha384 => compute::<Hmac<Sha384>>(secret, payload),
        SignatureAlgorithm::Sha512 => compute::<Hmac<Sha512>>(secret, payload),
    };

    format!("{}={}", algorithm.name(), hex::encode(digest))
}

fn keyed<M: Mac + KeyInit>(secret: &str, payload: &[u8]) -> Option<M> {
    let mut mac = <M as KeyInit>::new_from_slice(secret.as_bytes()).ok()?;
    Mac::update(&mut mac, payload);
    Some(mac)
}

fn verify<M: Mac + KeyInit>(secret: &str, payload: &[u8], digest: &[u8]) -> bool {
    keyed::<M>(secret, payload).map_or(false, |mac| mac.verify_slice(digest).is_ok())
}

fn compute<M: Mac + KeyInit>(secret: &str, payload: &[u8]) -> Vec<u8> {
    keyed::<M>(secret, payload)
        .map(|mac| mac.finalize().into_bytes().to_vec())
        .unwrap_or_default()
}
