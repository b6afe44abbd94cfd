//! RSA-OAEP(SHA-256) encryption of wire payloads.
//!
//! OAEP caps the plaintext per operation at `k - 2*hLen - 2` bytes, so the
//! payload is split into chunks of that size and each chunk is encrypted
//! separately. Every ciphertext block is exactly `k` bytes, which lets the
//! receiver split the body back without framing.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use super::EnvelopeError;

const SHA256_LEN: usize = 32;

fn max_chunk(modulus_len: usize) -> usize {
    modulus_len.saturating_sub(2 * SHA256_LEN + 2)
}

/// Agent side: encrypts with the server's public key.
#[derive(Debug, Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Accepts SPKI (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self, EnvelopeError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| EnvelopeError::Key(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let block = self.key.size();
        let chunk = max_chunk(block);
        if chunk == 0 {
            return Err(EnvelopeError::Key("RSA key too small for OAEP-SHA256".into()));
        }

        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(plaintext.len().div_ceil(chunk) * block);
        for part in plaintext.chunks(chunk) {
            let ct = self
                .key
                .encrypt(&mut rng, Oaep::new::<Sha256>(), part)
                .map_err(|e| EnvelopeError::Encryption(e.to_string()))?;
            out.extend_from_slice(&ct);
        }
        Ok(out)
    }
}

/// Server side: decrypts with the matching private key.
#[derive(Debug, Clone)]
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Accepts PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self, EnvelopeError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| EnvelopeError::Key(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let block = self.key.size();
        if ciphertext.len() % block != 0 {
            return Err(EnvelopeError::Decryption(format!(
                "ciphertext length {} is not a multiple of {block}",
                ciphertext.len()
            )));
        }

        let mut out = Vec::with_capacity(ciphertext.len());
        for part in ciphertext.chunks(block) {
            let pt = self
                .key
                .decrypt(Oaep::new::<Sha256>(), part)
                .map_err(|e| EnvelopeError::Decryption(e.to_string()))?;
            out.extend_from_slice(&pt);
        }
        Ok(out)
    }
}
