//! Reverse-encrypting file view engine.
//!
//! This crate implements the core of `rencfs`: a read-only view over a
//! backing directory in which every regular file appears as its
//! deterministically encrypted, authenticated ciphertext - or, in decrypt
//! mode, as the recovered plaintext.
//!
//! # Ciphertext format
//!
//! | Offset | Size | Description |
//! |--------|------|-------------|
//! | 0      | 16   | Wrapped per-file key: AES-128-ECB(master ECB half, K) |
//! | 16     | n    | AES-128-CTR(K, counter 0) XOR plaintext |
//!
//! The per-file key K is HMAC-SHA-256(master HMAC half, plaintext) truncated
//! to 16 bytes, so K is simultaneously the CTR key and the MAC of the
//! plaintext. Identical plaintexts under the same master key produce
//! identical ciphertext; repeated mirror passes are byte-stable, which is
//! what makes content-addressed deduplication of the mirror work.
//!
//! # Security model
//!
//! Determinism is intentional and documented: the scheme is not IND-CPA for
//! an attacker who can observe encryptions of related plaintexts. On the
//! decrypt side the wrapped key doubles as an authenticator - re-MACing the
//! ciphertext body must reproduce the unwrapped K, so any tampering with
//! either the prefix or the body is detected at open time.

pub mod crypto;
pub mod error;
pub mod view;

pub use crypto::keys::MasterKey;
pub use view::{CipherView, Mode, ViewError};
