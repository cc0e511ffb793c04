//! Master and per-file key material.
//!
//! The master key is the SHA-256 digest of the user passphrase, split into
//! two independent 16-byte halves: the HMAC half keys the per-file content
//! MACs, the ECB half wraps those MACs into the ciphertext prefix. Both
//! halves are held behind [`SecretBox`] so they are zeroed on drop and never
//! leak through `Debug` output.

use std::fmt;

use ring::digest;
use secrecy::{ExposeSecret, SecretBox};
use zeroize::Zeroizing;

/// Length of each master-key half and of every derived per-file key.
pub const KEY_SIZE: usize = 16;

/// A derived per-file key.
///
/// The same 16 bytes are simultaneously the truncated content MAC of the
/// plaintext and the AES-128-CTR key that encrypts it.
pub type FileKey = Zeroizing<[u8; KEY_SIZE]>;

/// Master key pair for the reverse-encrypting view.
pub struct MasterKey {
    hmac_key: SecretBox<[u8; KEY_SIZE]>,
    ecb_key: SecretBox<[u8; KEY_SIZE]>,
}

impl MasterKey {
    /// Derives the master key from a raw passphrase.
    ///
    /// The passphrase is hashed with SHA-256; bytes 0..16 of the digest
    /// become the HMAC half and bytes 16..32 the ECB half.
    pub fn from_passphrase(passphrase: &[u8]) -> Self {
        let digest = digest::digest(&digest::SHA256, passphrase);
        let material: &[u8; 32] = digest
            .as_ref()
            .try_into()
            .expect("SHA-256 digest is 32 bytes");
        Self::from_bytes(material)
    }

    /// Builds a master key from 32 bytes of raw key material.
    pub fn from_bytes(material: &[u8; 32]) -> Self {
        let mut hmac_half = [0u8; KEY_SIZE];
        let mut ecb_half = [0u8; KEY_SIZE];
        hmac_half.copy_from_slice(&material[..KEY_SIZE]);
        ecb_half.copy_from_slice(&material[KEY_SIZE..]);
        MasterKey {
            hmac_key: SecretBox::new(Box::new(hmac_half)),
            ecb_key: SecretBox::new(Box::new(ecb_half)),
        }
    }

    /// Execute a function with access to the HMAC half.
    ///
    /// Scoped access keeps the exposure window minimal: the callback cannot
    /// store a reference to the key beyond its own lifetime.
    pub fn with_hmac_key<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[u8; KEY_SIZE]) -> R,
    {
        f(self.hmac_key.expose_secret())
    }

    /// Execute a function with access to the ECB wrapping half.
    pub fn with_ecb_key<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[u8; KEY_SIZE]) -> R,
    {
        f(self.ecb_key.expose_secret())
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("hmac_key", &"[REDACTED]")
            .field("ecb_key", &"[REDACTED]")
            .finish()
    }
}
