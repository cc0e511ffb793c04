//! Per-file key derivation and recovery.
//!
//! Encrypt side: the key *is* the content MAC of the plaintext. Decrypt
//! side: the key is unwrapped from the 16-byte ciphertext prefix and,
//! unless verification is disabled, authenticated by re-MACing the
//! ciphertext body - tampering with either the prefix or the body makes the
//! recomputed MAC diverge from the unwrapped key.

use std::fs::File;
use std::io::{Seek, SeekFrom};

use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::block::ecb_decrypt_block;
use crate::crypto::keys::{FileKey, MasterKey};
use crate::view::ViewError;
use crate::view::mac::{MAC_SIZE, mac_ciphertext, mac_plaintext, read_full};

/// Derives the per-file key for a plaintext file (encrypt mode).
pub fn derive_encrypt(master: &MasterKey, file: &mut File) -> Result<FileKey, ViewError> {
    let mac = mac_plaintext(master, file)?;
    Ok(Zeroizing::new(mac))
}

/// Recovers the per-file key from a ciphertext file (decrypt mode).
///
/// With `verify` set, the ciphertext body is re-MACed under the recovered
/// key; a mismatch means the file was tampered with or encrypted under a
/// different master key, and no plaintext may be served from it.
pub fn derive_decrypt(
    master: &MasterKey,
    file: &mut File,
    verify: bool,
) -> Result<FileKey, ViewError> {
    file.seek(SeekFrom::Start(0))?;
    let mut wrapped = [0u8; MAC_SIZE];
    let n = read_full(file, &mut wrapped)?;
    if n < MAC_SIZE {
        return Err(ViewError::TruncatedCiphertext { actual: n as u64 });
    }

    let key: FileKey =
        Zeroizing::new(master.with_ecb_key(|ecb| ecb_decrypt_block(ecb, &wrapped)));

    if verify {
        let recomputed = mac_ciphertext(master, file, &key)?;
        if !bool::from(key[..].ct_eq(&recomputed[..])) {
            warn!(
                wrapped = %hex::encode(wrapped),
                "content MAC mismatch: ciphertext tampered or wrong master key"
            );
            return Err(ViewError::AuthenticationFailed);
        }
    }

    debug!(verified = verify, "per-file key recovered");
    Ok(key)
}
