//! Payload hardening between agent and server.
//!
//! Sealing order is fixed: gzip the payload, optionally RSA-encrypt the
//! compressed bytes, then sign exactly the bytes placed on the wire.
//! Opening runs the inverse: verify over the received bytes, decrypt,
//! gunzip.

pub mod cipher;
pub mod gzip;
pub mod signer;

use thiserror::Error;

pub use cipher::{Decryptor, Encryptor};
pub use signer::Signer;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("compression failed: {0}")]
    Compression(String),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key: {0}")]
    Key(String),
}

/// Wire-ready payload with the signature header value, if any.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub body: Vec<u8>,
    pub signature: Option<String>,
}

/// Agent-side transform: `payload -> gzip -> [encrypt] -> [sign]`.
#[derive(Debug, Clone, Default)]
pub struct Sealer {
    signer: Option<Signer>,
    encryptor: Option<Encryptor>,
}

impl Sealer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_encryptor(mut self, encryptor: Encryptor) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    pub fn signer(&self) -> Option<&Signer> {
        self.signer.as_ref()
    }

    pub fn seal(&self, payload: &[u8]) -> Result<Envelope, EnvelopeError> {
        let compressed = gzip::compress(payload)?;
        let body = match &self.encryptor {
            Some(enc) => enc.encrypt(&compressed)?,
            None => compressed,
        };
        let signature = self.signer.as_ref().map(|s| s.sign(&body));
        Ok(Envelope { body, signature })
    }
}

/// Server-side inverse of `Sealer`.
#[derive(Debug, Clone, Default)]
pub struct Opener {
    signer: Option<Signer>,
    decryptor: Option<Decryptor>,
}

impl Opener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_decryptor(mut self, decryptor: Decryptor) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    pub fn signer(&self) -> Option<&Signer> {
        self.signer.as_ref()
    }

    /// Whether request bodies need any processing at all.
    pub fn is_passthrough(&self) -> bool {
        self.signer.is_none() && self.decryptor.is_none()
    }

    /// Opens a received body.
    ///
    /// The signature is checked only when both a key is configured and the
    /// sender supplied one. Decryption applies to non-empty bodies when a
    /// private key is configured; gunzip applies when `gzipped` is set.
    pub fn open(
        &self,
        body: &[u8],
        signature: Option<&str>,
        gzipped: bool,
    ) -> Result<Vec<u8>, EnvelopeError> {
        if let (Some(signer), Some(sig)) = (&self.signer, signature) {
            signer.verify(body, sig)?;
        }

        let plain = match &self.decryptor {
            Some(dec) if !body.is_empty() => dec.decrypt(body)?,
            _ => body.to_vec(),
        };

        if gzipped {
            gzip::decompress(&plain)
        } else {
            Ok(plain)
        }
    }

    /// Signature for an outgoing response body, when a key is configured.
    pub fn sign(&self, body: &[u8]) -> Option<String> {
        self.signer.as_ref().map(|s| s.sign(body))
    }
}
