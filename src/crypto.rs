//! Hybrid envelope encryption for order uploads.
//!
//! The receiving commerce endpoint decrypts with a fixed legacy routine:
//! AES-256 in CBC mode with PKCS7 padding for the payload, and the one-time
//! AES key wrapped with RSA-OAEP (SHA-1) under the recipient's public key.
//! Both halves are base64 on the wire. The byte layout is the server's
//! contract; nothing here is negotiable.

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use std::sync::OnceLock;
use zeroize::Zeroize;

use crate::error::UploadError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Recipient public key baked in at build time. The upload endpoint holds
/// the matching private key; rotating it means shipping a new build.
pub const RECIPIENT_PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA15QFhyZoCGG4wvAhLWjt
5Lyjxn6RpNuKwDFUSTGu45dGV8JXvwWBq6f8xbxE8a16IUNboTZkQTV/biZvIt/T
DJGD8oLMKF6Pw3Uhd0Ifn4/R5HaI9Vba34IIuhBEQog0lvAJXaPlIgDBjilqdHBc
DVjriXtyKPUR0y5Hq0+unfXUmm4/ViNzWD8WaZ+uxoAsQ6eXAWKV1VEdvV9RfwlC
ZWSUHkCYVl2bnck0gNIZdFslq+L40HTDoFmKTa+md+4PF6PUajA5dj4tFTWE8XsU
Th9sM3OpZn4VJPgWT0hgQE94CX4s3COiIr2MXlItAfTnIrEZIpneQbCMAAKG/k/j
EwIDAQAB
-----END PUBLIC KEY-----";

/// Parsed form of the build-time key, parsed at most once per process.
static FIXED_RECIPIENT_KEY: OnceLock<RsaPublicKey> = OnceLock::new();

fn fixed_recipient_key() -> Result<&'static RsaPublicKey, UploadError> {
    if let Some(key) = FIXED_RECIPIENT_KEY.get() {
        return Ok(key);
    }
    let parsed = RsaPublicKey::from_public_key_pem(RECIPIENT_PUBLIC_KEY_PEM)
        .map_err(|e| UploadError::Configuration(format!("recipient public key: {e}")))?;
    Ok(FIXED_RECIPIENT_KEY.get_or_init(|| parsed))
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One-time symmetric key material plus its wrapped/encoded forms.
///
/// A session lives for a single upload (or one shared session for a whole
/// batch), is never persisted, and zeroes its raw key bytes on drop.
pub struct EncryptionSession {
    key: [u8; 32],
    iv: [u8; 16],
    /// RSA-OAEP/SHA-1 wrapped AES key, base64.
    pub wrapped_key: String,
    /// IV, base64.
    pub encoded_iv: String,
}

impl Drop for EncryptionSession {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

// ---------------------------------------------------------------------------
// Wire envelope
// ---------------------------------------------------------------------------

/// The exact JSON body the upload endpoint expects. All fields mandatory;
/// `delay` is a protocol filler the server requires to be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub key: String,
    pub iv: String,
    pub data: String,
    pub delay: u32,
}

// ---------------------------------------------------------------------------
// Cipher
// ---------------------------------------------------------------------------

/// Produces upload envelopes for a given recipient key.
pub struct OrderCipher {
    recipient: RsaPublicKey,
}

impl OrderCipher {
    /// Build a cipher over an explicit recipient public key (SPKI PEM).
    pub fn new(public_key_pem: &str) -> Result<Self, UploadError> {
        let recipient = RsaPublicKey::from_public_key_pem(public_key_pem)
            .map_err(|e| UploadError::Configuration(format!("recipient public key: {e}")))?;
        Ok(Self { recipient })
    }

    /// Build a cipher over the build-time-fixed recipient key.
    pub fn fixed() -> Result<Self, UploadError> {
        Ok(Self {
            recipient: fixed_recipient_key()?.clone(),
        })
    }

    /// Generate a fresh session: 32 random key bytes, 16 random IV bytes,
    /// key wrapped under the recipient key.
    ///
    /// Only fails when the crypto provider is unusable; that failure is
    /// fatal and must be surfaced immediately, not retried.
    pub fn create_session(&self) -> Result<EncryptionSession, UploadError> {
        let mut rng = rand::thread_rng();
        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut iv);

        let wrapped = self
            .recipient
            .encrypt(&mut rng, Oaep::new::<Sha1>(), &key)
            .map_err(|e| UploadError::Configuration(format!("key wrap failed: {e}")))?;

        Ok(EncryptionSession {
            key,
            iv,
            wrapped_key: BASE64_STANDARD.encode(wrapped),
            encoded_iv: BASE64_STANDARD.encode(iv),
        })
    }

    /// Serialize `payload` to canonical UTF-8 JSON and encrypt it under the
    /// session key/IV. Deterministic for a given payload and session; a
    /// different session necessarily yields different ciphertext.
    pub fn encrypt_with_session(
        &self,
        payload: &Value,
        session: &EncryptionSession,
    ) -> Result<EncryptedEnvelope, UploadError> {
        let plain = serde_json::to_vec(payload)
            .map_err(|e| UploadError::Ineligible(format!("serialize order payload: {e}")))?;

        let ciphertext = Aes256CbcEnc::new(&session.key.into(), &session.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(&plain);

        Ok(EncryptedEnvelope {
            key: session.wrapped_key.clone(),
            iv: session.encoded_iv.clone(),
            data: BASE64_STANDARD.encode(ciphertext),
            delay: 0,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
