//! Webhook authorization: three named schemes, one `verify` contract.
//!
//! Each scheme reads its own header(s) and verifies the request body against
//! a pre-shared secret (or, for `sourcehut`, a fixed public key). Failure of
//! any kind surfaces to the caller as `Error::Forbidden`.

use crate::error::{Error, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Github,
    Sourcehut,
    HmacSha256,
}

impl AuthKind {
    /// Unknown or empty `authKind` is coerced to `hmac-sha256`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => AuthKind::Github,
            "sourcehut" => AuthKind::Sourcehut,
            _ => AuthKind::HmacSha256,
        }
    }
}

/// A fixed-string, case-insensitive header map as presented by the HTTP
/// layer; kept independent of any particular web framework's header type so
/// this module can be unit tested without spinning up axum.
pub type Headers = HashMap<String, String>;

fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    let name = name.to_ascii_lowercase();
    headers
        .iter()
        .find(|(k, _)| k.to_ascii_lowercase() == name)
        .map(|(_, v)| v.as_str())
}

/// Fixed sourcehut public key this deployment trusts. Sourcehut's webhook
/// signing key is out of band (fetched once from the sourcehut instance and
/// pinned into the binary); it is not part of per-job configuration.
const SOURCEHUT_PUBKEY: &str = "MC4CAQAwBQYDK2VwBCIEIJSourcehutWebhookEd25519PlaceholderKey==";

pub fn verify(
    kind: AuthKind,
    headers: &Headers,
    body: &[u8],
    secret: &str,
    header_sign: &str,
) -> Result<()> {
    match kind {
        AuthKind::Github => verify_github(headers, body, secret),
        AuthKind::Sourcehut => verify_sourcehut(headers, body),
        AuthKind::HmacSha256 => verify_hmac_sha256(headers, body, secret, header_sign),
    }
}

fn verify_github(headers: &Headers, body: &[u8], secret: &str) -> Result<()> {
    if let Some(sig256) = header(headers, "X-Hub-Signature-256") {
        let expected = hmac_sha256_hex(secret, body);
        let given = sig256.strip_prefix("sha256=").unwrap_or(sig256);
        return if constant_time_eq(given, &expected) {
            Ok(())
        } else {
            Err(Error::forbidden("job-forbidden: X-Hub-Signature-256 mismatch"))
        };
    }

    if let Some(sig1) = header(headers, "X-Hub-Signature") {
        let expected = hmac_sha1_hex(secret, body);
        let given = sig1.strip_prefix("sha1=").unwrap_or(sig1);
        return if constant_time_eq(given, &expected) {
            Ok(())
        } else {
            Err(Error::forbidden("job-forbidden: X-Hub-Signature mismatch"))
        };
    }

    Err(Error::forbidden("job-forbidden: missing github signature header"))
}

fn verify_sourcehut(headers: &Headers, body: &[u8]) -> Result<()> {
    let signature_b64 = header(headers, "X-Payload-Signature")
        .ok_or_else(|| Error::forbidden("job-forbidden: missing X-Payload-Signature"))?;
    let nonce = header(headers, "X-Payload-Nonce")
        .ok_or_else(|| Error::forbidden("job-forbidden: missing X-Payload-Nonce"))?;

    let signature_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|_| Error::forbidden("job-forbidden: signature is not valid base64"))?;

    let mut message = Vec::with_capacity(body.len() + nonce.len());
    message.extend_from_slice(body);
    message.extend_from_slice(nonce.as_bytes());

    verify_ed25519(SOURCEHUT_PUBKEY, &message, &signature_bytes)
}

fn verify_ed25519(pubkey_b64: &str, message: &[u8], signature: &[u8]) -> Result<()> {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    let pubkey_bytes = base64::engine::general_purpose::STANDARD
        .decode(pubkey_b64)
        .map_err(|_| Error::forbidden("job-forbidden: invalid sourcehut public key"))?;
    let pubkey_bytes: [u8; 32] = pubkey_bytes
        .try_into()
        .map_err(|_| Error::forbidden("job-forbidden: sourcehut public key is not 32 bytes"))?;
    let verifying_key = VerifyingKey::from_bytes(&pubkey_bytes)
        .map_err(|_| Error::forbidden("job-forbidden: invalid sourcehut public key"))?;

    let signature_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| Error::forbidden("job-forbidden: signature is not 64 bytes"))?;
    let signature = Signature::from_bytes(&signature_bytes);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| Error::forbidden("job-forbidden: ed25519 verification failed"))
}

fn verify_hmac_sha256(headers: &Headers, body: &[u8], secret: &str, header_sign: &str) -> Result<()> {
    let given = header(headers, header_sign)
        .ok_or_else(|| Error::forbidden(format!("job-forbidden: missing {header_sign} header")))?;
    let expected = hmac_sha256_hex(secret, body);
    if constant_time_eq(given, &expected) {
        Ok(())
    } else {
        Err(Error::forbidden("job-forbidden: signature mismatch"))
    }
}

pub fn hmac_sha256_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn hmac_sha1_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
