use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING,
};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{BlockchainError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Width of one P-256 field element (coordinate or signature half)
pub const P256_SCALAR_LEN: usize = 32;

// SEC1 tag for an uncompressed point; stripped from stored public keys
const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

pub fn current_timestamp() -> Result<i64> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BlockchainError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    i64::try_from(secs).map_err(|_| BlockchainError::Crypto("Timestamp overflow".to_string()))
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| BlockchainError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

/// Generates a fresh P-256 key pair, returned as a PKCS#8 document
pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?
        .as_ref()
        .to_vec();
    Ok(pkcs8)
}

/// Raw public key of a PKCS#8 key pair: X || Y, without the point tag
pub fn public_key_from_pkcs8(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let point = key_pair.public_key().as_ref();
    match point.split_first() {
        Some((&UNCOMPRESSED_POINT_TAG, coordinates)) => Ok(coordinates.to_vec()),
        _ => Err(BlockchainError::Crypto(
            "Unexpected public key encoding".to_string(),
        )),
    }
}

/// Signs `message` and returns the fixed-width r || s signature
pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

/// Splits a concatenated pair (r || s, or X || Y) into its two halves.
///
/// An empty or odd-length input cannot be a pair and is rejected.
pub fn split_halves<'a>(bytes: &'a [u8], what: &str) -> Result<(&'a [u8], &'a [u8])> {
    if bytes.is_empty() || bytes.len() % 2 != 0 {
        return Err(BlockchainError::MalformedEncoding(format!(
            "{what} has length {} which cannot be split into two halves",
            bytes.len()
        )));
    }
    Ok(bytes.split_at(bytes.len() / 2))
}

/// Verifies an ECDSA P-256 signature from its parts.
///
/// Each part is a big-endian integer; shorter parts are left-padded to the
/// field width before the key and signature are rebuilt.
pub fn ecdsa_p256_sha256_sign_verify(
    x: &[u8],
    y: &[u8],
    r: &[u8],
    s: &[u8],
    message: &[u8],
) -> bool {
    let (Some(x), Some(y), Some(r), Some(s)) = (left_pad(x), left_pad(y), left_pad(r), left_pad(s))
    else {
        return false;
    };

    let mut public_key = Vec::with_capacity(1 + 2 * P256_SCALAR_LEN);
    public_key.push(UNCOMPRESSED_POINT_TAG);
    public_key.extend_from_slice(&x);
    public_key.extend_from_slice(&y);

    let mut signature = Vec::with_capacity(2 * P256_SCALAR_LEN);
    signature.extend_from_slice(&r);
    signature.extend_from_slice(&s);

    let peer_public_key =
        ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public_key);
    peer_public_key.verify(message, &signature).is_ok()
}

fn left_pad(part: &[u8]) -> Option<[u8; P256_SCALAR_LEN]> {
    if part.len() > P256_SCALAR_LEN {
        return None;
    }
    let mut padded = [0u8; P256_SCALAR_LEN];
    padded[P256_SCALAR_LEN - part.len()..].copy_from_slice(part);
    Some(padded)
}
