//! AES-128 block primitives: single-block ECB and the CTR keystream.
//!
//! The ciphertext format fixes the counter layout: a 128-bit big-endian
//! integer that starts at the block index and increments once per 16-byte
//! block. No nonce is involved - the counter alone determines the keystream,
//! which is what makes the scheme deterministic and randomly addressable.

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};

/// AES block size in bytes; also the CTR counter stride.
pub const BLOCK_SIZE: usize = 16;

/// AES-128-CTR with a big-endian 128-bit counter.
type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Encrypts a single block with AES-128-ECB.
pub fn ecb_encrypt_block(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(key.into());
    let mut out = aes::Block::from(*block);
    cipher.encrypt_block(&mut out);
    out.into()
}

/// Decrypts a single block with AES-128-ECB.
pub fn ecb_decrypt_block(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(key.into());
    let mut out = aes::Block::from(*block);
    cipher.decrypt_block(&mut out);
    out.into()
}

/// Applies the CTR keystream to `data` in place, with the counter starting
/// at `block_index`.
///
/// Length-preserving and involutive: applying it twice with the same key and
/// index round-trips, so encryption and decryption are the same operation.
pub fn ctr_apply(key: &[u8; 16], block_index: u128, data: &mut [u8]) {
    let counter = block_index.to_be_bytes();
    let mut cipher = Aes128Ctr::new(key.into(), (&counter).into());
    cipher.apply_keystream(data);
}

/// CTR transform for a buffer that starts at an arbitrary stream offset.
///
/// When `offset` is not block-aligned, the keystream input is padded with
/// `offset % 16` zero bytes so the counter can start at the enclosing block
/// boundary; the pad is discarded from the output.
pub fn ctr_apply_at(key: &[u8; 16], offset: u64, data: &[u8]) -> Vec<u8> {
    let pad = (offset as usize) % BLOCK_SIZE;
    let mut buf = vec![0u8; pad + data.len()];
    buf[pad..].copy_from_slice(data);
    ctr_apply(key, u128::from(offset) / BLOCK_SIZE as u128, &mut buf);
    buf.split_off(pad)
}
