//! Streaming content MAC: HMAC-SHA-256 over a file's plaintext, truncated
//! to 16 bytes.
//!
//! On the encrypt side the plaintext is on disk and streams straight through
//! the HMAC. On the decrypt side only ciphertext is on disk, so each chunk
//! is CTR-decrypted on the fly and the recovered *plaintext* is fed to the
//! HMAC - the result must reproduce the key that was unwrapped from the
//! ciphertext prefix.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use ring::hmac;

use crate::crypto::block::{BLOCK_SIZE, ctr_apply_at};
use crate::crypto::keys::{KEY_SIZE, MasterKey};

/// Truncated HMAC length; equals the AES block size, so the MAC can double
/// as a CTR key.
pub const MAC_SIZE: usize = 16;

/// Streaming buffer size. A performance knob, not a correctness one - except
/// that it must stay a multiple of [`BLOCK_SIZE`] so every ciphertext chunk
/// begins on a counter boundary.
pub(crate) const BUFFER_SIZE: usize = 16 * 1024;

const _: () = assert!(BUFFER_SIZE % BLOCK_SIZE == 0);

/// Reads until `buf` is full or EOF is reached, retrying on interruption.
///
/// A bare `read(2)` may return short even mid-file; the ciphertext MAC walk
/// re-derives its CTR counter from the byte position, so chunks must only
/// ever end short at EOF.
pub(crate) fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn truncated(tag: hmac::Tag) -> [u8; MAC_SIZE] {
    let mut out = [0u8; MAC_SIZE];
    out.copy_from_slice(&tag.as_ref()[..MAC_SIZE]);
    out
}

fn hmac_context(master: &MasterKey) -> hmac::Context {
    master.with_hmac_key(|key| {
        hmac::Context::with_key(&hmac::Key::new(hmac::HMAC_SHA256, key))
    })
}

/// MACs a plaintext file from the beginning.
pub fn mac_plaintext(master: &MasterKey, file: &mut File) -> io::Result<[u8; MAC_SIZE]> {
    let mut ctx = hmac_context(master);
    file.seek(SeekFrom::Start(0))?;

    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = read_full(file, &mut buf)?;
        if n == 0 {
            break;
        }
        ctx.update(&buf[..n]);
        if n < BUFFER_SIZE {
            break;
        }
    }
    Ok(truncated(ctx.sign()))
}

/// MACs the plaintext recovered from a ciphertext file.
///
/// Starts at ciphertext offset 16 (past the wrapped-key prefix) and
/// CTR-decrypts each chunk under `key` before updating the HMAC. The chunk
/// position `pos` tracks ciphertext coordinates; the CTR counter is derived
/// from `pos - 16`, the corresponding plaintext coordinate.
pub fn mac_ciphertext(
    master: &MasterKey,
    file: &mut File,
    key: &[u8; KEY_SIZE],
) -> io::Result<[u8; MAC_SIZE]> {
    let mut ctx = hmac_context(master);
    let mut pos = MAC_SIZE as u64;
    file.seek(SeekFrom::Start(pos))?;

    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = read_full(file, &mut buf)?;
        if n == 0 {
            break;
        }
        let plaintext = ctr_apply_at(key, pos - MAC_SIZE as u64, &buf[..n]);
        ctx.update(&plaintext);
        pos += n as u64;
        if n < BUFFER_SIZE {
            break;
        }
    }
    Ok(truncated(ctx.sign()))
}
