//! End-to-end tests for the reverse-encrypting view engine: the ciphertext
//! format, random-access reads, authentication, and the read-only surface.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;

use nix::fcntl::OFlag;
use nix::unistd::AccessFlags;
use proptest::prelude::*;
use ring::hmac;
use tempfile::TempDir;

use rencfs_core::crypto::block::{ctr_apply, ecb_encrypt_block};
use rencfs_core::view::ViewError;
use rencfs_core::{CipherView, MasterKey, Mode};

const MAC_SIZE: usize = 16;
const RDONLY: i32 = 0; // O_RDONLY

fn master() -> MasterKey {
    MasterKey::from_passphrase(b"pw")
}

/// The master key halves, computed independently of the engine.
fn master_halves() -> ([u8; 16], [u8; 16]) {
    let digest = ring::digest::digest(&ring::digest::SHA256, b"pw");
    let bytes = digest.as_ref();
    (
        bytes[..16].try_into().unwrap(),
        bytes[16..].try_into().unwrap(),
    )
}

/// The per-file key for `plaintext`, computed independently of the engine.
fn expected_key(plaintext: &[u8]) -> [u8; 16] {
    let (hmac_half, _) = master_halves();
    let tag = hmac::sign(&hmac::Key::new(hmac::HMAC_SHA256, &hmac_half), plaintext);
    tag.as_ref()[..16].try_into().unwrap()
}

/// The full ciphertext for `plaintext`, computed independently of the engine.
fn expected_ciphertext(plaintext: &[u8]) -> Vec<u8> {
    let (_, ecb_half) = master_halves();
    let key = expected_key(plaintext);
    let mut out = ecb_encrypt_block(&ecb_half, &key).to_vec();
    let mut body = plaintext.to_vec();
    ctr_apply(&key, 0, &mut body);
    out.extend_from_slice(&body);
    out
}

/// A backing tree holding a single file `f` with the given content, plus an
/// encrypt-mode view over it.
fn encrypt_view(content: &[u8]) -> (TempDir, CipherView) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("f"), content).unwrap();
    let view = CipherView::new(dir.path(), master(), Mode::Encrypt);
    (dir, view)
}

/// Reads the whole view of `path` through one handle.
fn full_read(view: &mut CipherView, path: &str) -> Vec<u8> {
    let size = view.getattr(path).unwrap().size;
    let fh = view.open(path, RDONLY).unwrap();
    let data = view.read(fh, 0, size as usize + 1024).unwrap();
    view.release(fh).unwrap();
    data
}

/// Encrypts `plaintext` through the engine and lands the ciphertext in a
/// fresh backing tree, returning it alongside the tree that was read from.
fn ciphertext_tree(plaintext: &[u8]) -> TempDir {
    let (_src, mut enc) = encrypt_view(plaintext);
    let ciphertext = full_read(&mut enc, "f");
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("f"), ciphertext).unwrap();
    dir
}

// ============================================================================
// Ciphertext format
// ============================================================================

#[test]
fn test_empty_file_is_wrapped_key_only() {
    let (_dir, mut view) = encrypt_view(b"");

    assert_eq!(view.getattr("f").unwrap().size, 16);

    let fh = view.open("f", RDONLY).unwrap();
    let data = view.read(fh, 0, 100).unwrap();
    assert_eq!(data, expected_ciphertext(b""));
    assert_eq!(data.len(), 16);
}

#[test]
fn test_single_block_layout() {
    let plaintext = [b' '; 16];
    let (_dir, mut view) = encrypt_view(&plaintext);
    let expected = expected_ciphertext(&plaintext);

    let fh = view.open("f", RDONLY).unwrap();
    assert_eq!(view.read(fh, 0, 32).unwrap(), expected);

    // Body alone.
    assert_eq!(view.read(fh, 16, 16).unwrap(), &expected[16..32]);

    // Straddling the wrapped-key prefix: 8 prefix bytes then 8 body bytes.
    assert_eq!(view.read(fh, 8, 16).unwrap(), &expected[8..24]);
}

#[test]
fn test_ciphertext_matches_directly_computed_format() {
    let plaintext: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let (_dir, mut view) = encrypt_view(&plaintext);
    assert_eq!(full_read(&mut view, "f"), expected_ciphertext(&plaintext));
}

#[test]
fn test_size_law() {
    for len in [0usize, 1, 15, 16, 17, 1000, 16 * 1024, 16 * 1024 + 3] {
        let (_dir, mut view) = encrypt_view(&vec![0x61u8; len]);
        assert_eq!(view.getattr("f").unwrap().size, (len + 16) as u64);
        assert_eq!(full_read(&mut view, "f").len(), len + 16, "length {len}");
    }
}

#[test]
fn test_determinism_across_views_and_files() {
    let plaintext = vec![0x42u8; 5000];

    let (_d1, mut v1) = encrypt_view(&plaintext);
    let (_d2, mut v2) = encrypt_view(&plaintext);
    assert_eq!(full_read(&mut v1, "f"), full_read(&mut v2, "f"));

    // Two identical files in one tree encrypt identically too.
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a"), &plaintext).unwrap();
    fs::write(dir.path().join("b"), &plaintext).unwrap();
    let mut view = CipherView::new(dir.path(), master(), Mode::Encrypt);
    assert_eq!(full_read(&mut view, "a"), full_read(&mut view, "b"));
}

// ============================================================================
// Random access
// ============================================================================

#[test]
fn test_random_access_equals_full_read_slices() {
    let plaintext: Vec<u8> = (0..4096u32).map(|i| (i % 253) as u8).collect();
    let (_dir, mut view) = encrypt_view(&plaintext);
    let full = full_read(&mut view, "f");

    let fh = view.open("f", RDONLY).unwrap();
    for (offset, len) in [
        (0usize, 1usize),
        (1, 1),
        (15, 2),
        (16, 16),
        (17, 31),
        (100, 999),
        (4000, 500),   // truncates at EOF
        (5000, 10),    // entirely past EOF
        (0, 10_000),
        (33, 0),
    ] {
        let got = view.read(fh, offset as u64, len).unwrap();
        let end = full.len().min(offset + len);
        let expected = if offset < full.len() {
            &full[offset..end]
        } else {
            &[]
        };
        assert_eq!(got, expected, "offset {offset} len {len}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any partition of [0, size) read chunk by chunk concatenates to the
    /// single full read, regardless of where the chunk boundaries fall.
    #[test]
    fn prop_reads_are_alignment_independent(
        len in 0usize..2048,
        chunk in 1usize..97,
        seed in any::<u8>(),
    ) {
        let plaintext: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
        let (_dir, mut view) = encrypt_view(&plaintext);
        let full = full_read(&mut view, "f");

        let fh = view.open("f", RDONLY).unwrap();
        let mut stitched = Vec::new();
        let mut offset = 0usize;
        while offset < full.len() {
            let part = view.read(fh, offset as u64, chunk).unwrap();
            prop_assert!(!part.is_empty());
            stitched.extend_from_slice(&part);
            offset += part.len();
        }
        prop_assert_eq!(stitched, full);
    }
}

// ============================================================================
// Decrypt mode
// ============================================================================

#[test]
fn test_large_file_roundtrip() {
    let plaintext = vec![b' '; 1024 * 1024];
    let dir = ciphertext_tree(&plaintext);

    let mut view = CipherView::new(dir.path(), master(), Mode::Decrypt);
    assert_eq!(view.getattr("f").unwrap().size, plaintext.len() as u64);

    let fh = view.open("f", RDONLY).unwrap();
    assert_eq!(view.read(fh, 0, plaintext.len()).unwrap(), plaintext);

    // Reads entirely past end of plaintext are empty.
    assert_eq!(view.read(fh, plaintext.len() as u64 + 1, 1).unwrap(), b"");
}

#[test]
fn test_decrypt_unaligned_reads() {
    let plaintext: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let dir = ciphertext_tree(&plaintext);

    let mut view = CipherView::new(dir.path(), master(), Mode::Decrypt);
    let fh = view.open("f", RDONLY).unwrap();
    for (offset, len) in [(1usize, 1usize), (7, 100), (15, 17), (999, 10)] {
        let end = plaintext.len().min(offset + len);
        assert_eq!(
            view.read(fh, offset as u64, len).unwrap(),
            &plaintext[offset..end],
            "offset {offset} len {len}"
        );
    }
}

#[test]
fn test_roundtrip_arbitrary_content() {
    let plaintext: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let dir = ciphertext_tree(&plaintext);

    let mut view = CipherView::new(dir.path(), master(), Mode::Decrypt);
    assert_eq!(full_read(&mut view, "f"), plaintext);
}

// ============================================================================
// Authentication
// ============================================================================

#[test]
fn test_tampered_body_fails_open() {
    let plaintext = vec![b' '; 4096];
    let dir = ciphertext_tree(&plaintext);

    // Flip one bit of the first body byte.
    let path = dir.path().join("f");
    let mut bytes = fs::read(&path).unwrap();
    bytes[17] ^= 1;
    fs::write(&path, &bytes).unwrap();

    let mut view = CipherView::new(dir.path(), master(), Mode::Decrypt);
    assert!(matches!(
        view.open("f", RDONLY),
        Err(ViewError::AuthenticationFailed)
    ));
    assert_eq!(view.open_handles(), 0);

    // Without verification the open succeeds but the plaintext is garbage.
    let mut view = CipherView::new(dir.path(), master(), Mode::Decrypt).with_verification(false);
    let data = full_read(&mut view, "f");
    assert_eq!(data.len(), plaintext.len());
    assert_ne!(data, plaintext);
}

#[test]
fn test_tampered_prefix_fails_open() {
    let dir = ciphertext_tree(&[b' '; 256]);
    let path = dir.path().join("f");
    let mut bytes = fs::read(&path).unwrap();
    bytes[0] ^= 0x80;
    fs::write(&path, &bytes).unwrap();

    let mut view = CipherView::new(dir.path(), master(), Mode::Decrypt);
    assert!(matches!(
        view.open("f", RDONLY),
        Err(ViewError::AuthenticationFailed)
    ));
}

#[test]
fn test_wrong_master_key_fails_open() {
    let dir = ciphertext_tree(&[b' '; 1024]);

    // Same 32 bytes of material with the halves swapped.
    let digest = ring::digest::digest(&ring::digest::SHA256, b"pw");
    let mut swapped = [0u8; 32];
    swapped[..16].copy_from_slice(&digest.as_ref()[16..]);
    swapped[16..].copy_from_slice(&digest.as_ref()[..16]);

    let mut view =
        CipherView::new(dir.path(), MasterKey::from_bytes(&swapped), Mode::Decrypt);
    assert!(matches!(
        view.open("f", RDONLY),
        Err(ViewError::AuthenticationFailed)
    ));
}

#[test]
fn test_truncated_ciphertext_fails_open() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("f"), [0u8; 10]).unwrap();

    let mut view = CipherView::new(dir.path(), master(), Mode::Decrypt);
    assert!(matches!(
        view.open("f", RDONLY),
        Err(ViewError::TruncatedCiphertext { actual: 10 })
    ));

    // Also rejected with verification off - there is no key to recover.
    let mut view = CipherView::new(dir.path(), master(), Mode::Decrypt).with_verification(false);
    assert!(matches!(
        view.open("f", RDONLY),
        Err(ViewError::TruncatedCiphertext { .. })
    ));
}

// ============================================================================
// Read-only surface
// ============================================================================

#[test]
fn test_write_flags_rejected() {
    let (_dir, mut view) = encrypt_view(b"data");

    for flags in [
        OFlag::O_WRONLY,
        OFlag::O_RDWR,
        OFlag::O_CREAT,
        OFlag::O_TRUNC,
        OFlag::O_APPEND,
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
    ] {
        assert!(
            matches!(view.open("f", flags.bits()), Err(ViewError::ReadOnly)),
            "flags {flags:?}"
        );
    }
    assert_eq!(view.open_handles(), 0);
}

#[test]
fn test_mutating_ops_rejected() {
    let (_dir, mut view) = encrypt_view(b"data");

    assert!(matches!(view.create("x", 0o644), Err(ViewError::ReadOnly)));
    assert!(matches!(
        view.utimens("f", None, None),
        Err(ViewError::ReadOnly)
    ));
}

#[test]
fn test_access_write_bit_rejected() {
    let (_dir, view) = encrypt_view(b"data");

    assert!(view.access("f", AccessFlags::R_OK.bits()).is_ok());
    assert!(matches!(
        view.access("f", AccessFlags::W_OK.bits()),
        Err(ViewError::PermissionDenied { .. })
    ));
    assert!(matches!(
        view.access("missing", AccessFlags::R_OK.bits()),
        Err(ViewError::NotFound { .. })
    ));
}

// ============================================================================
// Handles
// ============================================================================

#[test]
fn test_handle_lifecycle() {
    let (_dir, mut view) = encrypt_view(b"data");

    let fh = view.open("f", RDONLY).unwrap();
    assert_eq!(view.open_handles(), 1);

    view.release(fh).unwrap();
    assert_eq!(view.open_handles(), 0);

    assert!(matches!(view.release(fh), Err(ViewError::BadHandle(_))));
    assert!(matches!(view.read(fh, 0, 1), Err(ViewError::BadHandle(_))));
}

#[test]
fn test_key_is_per_handle_not_per_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("f");
    fs::write(&path, vec![1u8; 64]).unwrap();

    let mut view = CipherView::new(dir.path(), master(), Mode::Encrypt);
    let fh1 = view.open("f", RDONLY).unwrap();
    let first = view.read(fh1, 0, 100).unwrap();

    // Same size, different content: a second open must derive a new key.
    fs::write(&path, vec![2u8; 64]).unwrap();
    let fh2 = view.open("f", RDONLY).unwrap();
    let second = view.read(fh2, 0, 100).unwrap();

    assert_eq!(first.len(), second.len());
    assert_ne!(first[..MAC_SIZE], second[..MAC_SIZE]);
}

// ============================================================================
// Directory surface
// ============================================================================

#[test]
fn test_readdir_lists_entries_with_dots() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a"), b"x").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();

    let view = CipherView::new(dir.path(), master(), Mode::Encrypt);
    let entries = view.readdir("/").unwrap();
    let names: Vec<String> = entries
        .iter()
        .map(|e| e.name.to_string_lossy().into_owned())
        .collect();

    assert_eq!(&names[..2], &[".", ".."]);
    assert!(names.contains(&"a".to_string()));
    assert!(names.contains(&"sub".to_string()));

    assert!(view.readdir("a").is_err());
    assert!(matches!(
        view.readdir("missing"),
        Err(ViewError::NotFound { .. })
    ));
}

#[test]
fn test_getattr_missing_path() {
    let (_dir, view) = encrypt_view(b"data");
    assert!(matches!(
        view.getattr("missing"),
        Err(ViewError::NotFound { .. })
    ));
}

#[test]
fn test_directory_size_not_adjusted() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let backing = fs::metadata(dir.path().join("sub")).unwrap().len();

    let view = CipherView::new(dir.path(), master(), Mode::Encrypt);
    assert_eq!(view.getattr("sub").unwrap().size, backing);
}

#[test]
fn test_symlink_absolute_target_sanitized() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("f"), b"x").unwrap();
    symlink(dir.path().join("f"), dir.path().join("l")).unwrap();

    let view = CipherView::new(dir.path(), master(), Mode::Encrypt);
    assert_eq!(view.readlink("l").unwrap(), PathBuf::from("f"));
}

#[test]
fn test_symlink_relative_target_passthrough() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("f"), b"x").unwrap();
    symlink("f", dir.path().join("l")).unwrap();

    let view = CipherView::new(dir.path(), master(), Mode::Encrypt);
    assert_eq!(view.readlink("l").unwrap(), PathBuf::from("f"));
}

#[test]
fn test_statfs_passthrough() {
    let (_dir, view) = encrypt_view(b"data");
    let stats = view.statfs("/").unwrap();
    assert!(stats.block_size > 0);
    assert!(stats.blocks > 0);

    assert!(matches!(
        view.statfs("missing"),
        Err(ViewError::NotFound { .. })
    ));
}
