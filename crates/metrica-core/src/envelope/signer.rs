use ring::hmac;

use super::EnvelopeError;

/// HMAC-SHA256 signer over wire bytes, keyed by a pre-shared secret.
#[derive(Clone)]
pub struct Signer {
    key: hmac::Key,
}

impl Signer {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// Hex-encoded HMAC of `data`.
    pub fn sign(&self, data: &[u8]) -> String {
        let tag = hmac::sign(&self.key, data);
        hex::encode(tag.as_ref())
    }

    /// Constant-time check of a hex signature against `data`.
    pub fn verify(&self, data: &[u8], signature: &str) -> Result<(), EnvelopeError> {
        let tag = hex::decode(signature.trim()).map_err(|_| EnvelopeError::SignatureMismatch)?;
        hmac::verify(&self.key, data, &tag).map_err(|_| EnvelopeError::SignatureMismatch)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer(..)")
    }
}
