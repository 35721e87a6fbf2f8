//! Ed25519 signing over PEM-encoded device keys.
//!
//! Signatures and public keys travel as base64url without padding. The public
//! key is the raw 32-byte key, not its SPKI wrapping.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// DER prefix of an Ed25519 SubjectPublicKeyInfo; the raw key follows it.
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),
}

/// Sign `payload` with a PKCS#8 PEM private key.
pub fn sign(private_key_pem: &str, payload: &str) -> Result<String, SignerError> {
    let key = SigningKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| SignerError::InvalidPrivateKey(e.to_string()))?;
    let signature = key.sign(payload.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

/// Raw public key bytes from an SPKI PEM.
pub fn public_key_raw(public_key_pem: &str) -> Result<[u8; 32], SignerError> {
    let key = VerifyingKey::from_public_key_pem(public_key_pem)
        .map_err(|e| SignerError::InvalidPublicKey(e.to_string()))?;
    let der = key
        .to_public_key_der()
        .map_err(|e| SignerError::InvalidPublicKey(e.to_string()))?;
    let raw = der
        .as_bytes()
        .strip_prefix(ED25519_SPKI_PREFIX.as_slice())
        .ok_or_else(|| SignerError::InvalidPublicKey("not an Ed25519 key".into()))?;
    <[u8; 32]>::try_from(raw)
        .map_err(|_| SignerError::InvalidPublicKey(format!("expected 32 key bytes, got {}", raw.len())))
}

/// Raw public key, base64url-encoded for the `device.publicKey` field.
pub fn public_key_base64url(public_key_pem: &str) -> Result<String, SignerError> {
    Ok(URL_SAFE_NO_PAD.encode(public_key_raw(public_key_pem)?))
}

/// Check a base64url signature over `payload` against a base64url raw key.
pub fn verify(public_key_b64: &str, payload: &str, signature_b64: &str) -> Result<bool, SignerError> {
    let raw = URL_SAFE_NO_PAD
        .decode(public_key_b64)
        .map_err(|e| SignerError::InvalidPublicKey(e.to_string()))?;
    let raw = <[u8; 32]>::try_from(raw.as_slice())
        .map_err(|_| SignerError::InvalidPublicKey(format!("expected 32 key bytes, got {}", raw.len())))?;
    let key =
        VerifyingKey::from_bytes(&raw).map_err(|e| SignerError::InvalidPublicKey(e.to_string()))?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    let signature =
        Signature::from_slice(&signature).map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    Ok(key.verify(payload.as_bytes(), &signature).is_ok())
}
