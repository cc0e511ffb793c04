//! The cryptographic file view: a read-only surface over a backing
//! directory in which regular files appear encrypted (or, in decrypt mode,
//! decrypted).
//!
//! [`CipherView`] exposes the filesystem operations a FUSE bridge needs:
//! `access`, `getattr`, `readdir`, `readlink`, `statfs`, `open`, `read`,
//! `release`, and rejection stubs for the mutating surface. Paths are
//! view-relative (`/foo/bar` or `foo/bar`); handles are opaque `u64` ids.

pub mod handles;
pub mod key;
pub mod mac;
pub mod offset;

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::statvfs;
use nix::unistd::{self, AccessFlags};
use thiserror::Error;
use tracing::{debug, trace};

use crate::crypto::block::{ctr_apply_at, ecb_encrypt_block};
use crate::crypto::keys::MasterKey;
use crate::view::handles::{HandleTable, OpenFile};
use crate::view::mac::MAC_SIZE;

/// Which direction the view transforms file contents.
///
/// In `Encrypt` mode the backing directory holds plaintext and the view
/// serves ciphertext; in `Decrypt` mode the backing directory holds
/// ciphertext and the view serves plaintext. The mode is fixed per view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Encrypt,
    Decrypt,
}

/// Errors surfaced by the view engine.
///
/// Nothing is recovered internally; every error maps onto a POSIX errno at
/// the FUSE boundary. An authentication failure is terminal for the open
/// attempt - no plaintext is ever served from an unverified file.
#[derive(Debug, Error)]
pub enum ViewError {
    /// Backing path missing (ENOENT).
    #[error("path not found: {path}")]
    NotFound { path: String },

    /// Access check failed or write bits requested (EACCES).
    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    /// Any mutating operation, or `open` with write flags (EROFS).
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Recomputed content MAC does not match the unwrapped per-file key
    /// (EPERM): the ciphertext was tampered with or the master key is wrong.
    #[error("content MAC verification failed: tampering or wrong key")]
    AuthenticationFailed,

    /// Operation on a handle that is not in the table (EBADF).
    #[error("unknown file handle: {0}")]
    BadHandle(u64),

    /// Extended attributes and other unsupported operations (ENOTSUP).
    #[error("operation not supported")]
    NotSupported,

    /// Ciphertext shorter than its 16-byte wrapped-key prefix (EIO); no
    /// per-file key can be recovered from it.
    #[error("ciphertext truncated: {actual} bytes, shorter than its key prefix")]
    TruncatedCiphertext { actual: u64 },

    /// Pass-through OS error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Stat results with the view's size adjustment applied.
#[derive(Debug, Clone, Copy)]
pub struct FileAttributes {
    /// Size as visible in the view: backing size +16 (encrypt) or -16
    /// (decrypt) for regular files, unadjusted otherwise.
    pub size: u64,
    pub kind: EntryKind,
    /// Permission bits of `st_mode`.
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

/// File type of a backing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    RegularFile,
    Symlink,
    BlockDevice,
    CharDevice,
    NamedPipe,
    Socket,
}

impl From<fs::FileType> for EntryKind {
    fn from(ft: fs::FileType) -> Self {
        use std::os::unix::fs::FileTypeExt;

        if ft.is_dir() {
            EntryKind::Directory
        } else if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_block_device() {
            EntryKind::BlockDevice
        } else if ft.is_char_device() {
            EntryKind::CharDevice
        } else if ft.is_fifo() {
            EntryKind::NamedPipe
        } else if ft.is_socket() {
            EntryKind::Socket
        } else {
            EntryKind::RegularFile
        }
    }
}

/// A single `readdir` result.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: EntryKind,
}

/// Filesystem statistics passed through from the backing store.
#[derive(Debug, Clone, Copy)]
pub struct FsStats {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub block_size: u64,
    pub fragment_size: u64,
    pub name_max: u64,
}

/// The reverse-encrypting view engine.
///
/// One instance serves one mount: a backing root, a master key, a fixed
/// [`Mode`], and the table of open handles. All operations are synchronous
/// and self-contained; the engine keeps no stream position between reads.
pub struct CipherView {
    root: PathBuf,
    master: MasterKey,
    mode: Mode,
    verify: bool,
    handles: HandleTable,
}

impl CipherView {
    /// Creates a view over `root`. Decrypt-mode MAC verification is on by
    /// default; disable it with [`with_verification`](Self::with_verification).
    pub fn new(root: impl Into<PathBuf>, master: MasterKey, mode: Mode) -> Self {
        CipherView {
            root: root.into(),
            master,
            mode,
            verify: true,
            handles: HandleTable::new(),
        }
    }

    /// Toggles decrypt-mode MAC verification.
    ///
    /// With verification off the view serves unauthenticated plaintext;
    /// callers should not feed it to untrusted sinks. Has no effect in
    /// encrypt mode.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Number of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    /// Maps an OS error on `path`, folding ENOENT into the taxonomy.
    fn os_error(path: &str, err: io::Error) -> ViewError {
        if err.kind() == io::ErrorKind::NotFound {
            ViewError::NotFound {
                path: path.to_string(),
            }
        } else {
            ViewError::Io(err)
        }
    }

    /// Checks accessibility of `path` for `mask` (the `access(2)` mode bits).
    ///
    /// Any write bit is refused outright - the view is read-only regardless
    /// of the backing file's permissions.
    pub fn access(&self, path: &str, mask: i32) -> Result<(), ViewError> {
        trace!(path, mask, "access");
        let flags = AccessFlags::from_bits_truncate(mask);
        if flags.contains(AccessFlags::W_OK) {
            return Err(ViewError::PermissionDenied {
                path: path.to_string(),
            });
        }
        unistd::access(&self.full_path(path), flags).map_err(|errno| match errno {
            Errno::ENOENT => ViewError::NotFound {
                path: path.to_string(),
            },
            Errno::EACCES => ViewError::PermissionDenied {
                path: path.to_string(),
            },
            other => ViewError::Io(io::Error::from(other)),
        })
    }

    /// Stats the backing entry, adjusting `st_size` by the 16-byte key
    /// prefix for regular files.
    pub fn getattr(&self, path: &str) -> Result<FileAttributes, ViewError> {
        trace!(path, "getattr");
        let meta =
            fs::symlink_metadata(self.full_path(path)).map_err(|e| Self::os_error(path, e))?;

        let mut size = meta.size();
        if meta.file_type().is_file() {
            size = match self.mode {
                Mode::Encrypt => size + MAC_SIZE as u64,
                Mode::Decrypt => size.saturating_sub(MAC_SIZE as u64),
            };
        }

        Ok(FileAttributes {
            size,
            kind: EntryKind::from(meta.file_type()),
            mode: meta.mode() & 0o7777,
            nlink: meta.nlink(),
            uid: meta.uid(),
            gid: meta.gid(),
            atime: timestamp(meta.atime(), meta.atime_nsec()),
            mtime: timestamp(meta.mtime(), meta.mtime_nsec()),
            ctime: timestamp(meta.ctime(), meta.ctime_nsec()),
        })
    }

    /// Lists a directory: `.`, `..`, then the backing entries with their
    /// kinds. Names pass through unchanged - the view does not obfuscate
    /// filenames.
    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, ViewError> {
        trace!(path, "readdir");
        let mut entries = vec![
            DirEntry {
                name: OsString::from("."),
                kind: EntryKind::Directory,
            },
            DirEntry {
                name: OsString::from(".."),
                kind: EntryKind::Directory,
            },
        ];
        for entry in fs::read_dir(self.full_path(path)).map_err(|e| Self::os_error(path, e))? {
            let entry = entry?;
            let kind = entry
                .file_type()
                .map_or(EntryKind::RegularFile, EntryKind::from);
            entries.push(DirEntry {
                name: entry.file_name(),
                kind,
            });
        }
        Ok(entries)
    }

    /// Reads a symlink target. Absolute targets are rewritten relative to
    /// the backing root so they cannot point outside the mounted view.
    pub fn readlink(&self, path: &str) -> Result<PathBuf, ViewError> {
        trace!(path, "readlink");
        let target =
            fs::read_link(self.full_path(path)).map_err(|e| Self::os_error(path, e))?;
        if target.is_absolute() {
            Ok(relative_to(&target, &self.root))
        } else {
            Ok(target)
        }
    }

    /// Passes through filesystem statistics from the backing store.
    pub fn statfs(&self, path: &str) -> Result<FsStats, ViewError> {
        trace!(path, "statfs");
        let stat = statvfs::statvfs(&self.full_path(path)).map_err(|errno| match errno {
            Errno::ENOENT => ViewError::NotFound {
                path: path.to_string(),
            },
            other => ViewError::Io(io::Error::from(other)),
        })?;
        Ok(FsStats {
            blocks: u64::from(stat.blocks()),
            blocks_free: u64::from(stat.blocks_free()),
            blocks_available: u64::from(stat.blocks_available()),
            files: u64::from(stat.files()),
            files_free: u64::from(stat.files_free()),
            block_size: u64::from(stat.block_size()),
            fragment_size: u64::from(stat.fragment_size()),
            name_max: u64::from(stat.name_max()),
        })
    }

    /// Opens a backing file read-only and derives its per-file key.
    ///
    /// Any flag implying write or create is refused with [`ViewError::ReadOnly`].
    /// In decrypt mode with verification on, the whole ciphertext is
    /// authenticated here, before a single byte can be read through the
    /// handle. The key is fixed for the handle's lifetime; a backing file
    /// swapped underneath a live handle is read through the stale key - the
    /// trust boundary is the open call.
    pub fn open(&mut self, path: &str, flags: i32) -> Result<u64, ViewError> {
        let oflags = OFlag::from_bits_truncate(flags);
        let write_flags =
            OFlag::O_WRONLY | OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_TRUNC | OFlag::O_APPEND;
        if oflags.intersects(write_flags) {
            return Err(ViewError::ReadOnly);
        }

        let mut file =
            File::open(self.full_path(path)).map_err(|e| Self::os_error(path, e))?;
        let key = match self.mode {
            Mode::Encrypt => key::derive_encrypt(&self.master, &mut file)?,
            Mode::Decrypt => key::derive_decrypt(&self.master, &mut file, self.verify)?,
        };

        let fh = self.handles.insert(OpenFile { file, key });
        debug!(path, fh, "opened");
        Ok(fh)
    }

    /// Serves a random-access read of `len` bytes at view offset `offset`.
    ///
    /// Each read is self-contained: the offset plan is computed fresh, the
    /// backing file is seeked, and CTR's random-access property does the
    /// rest. Requests past end of file truncate; requests entirely past it
    /// return empty.
    pub fn read(&mut self, fh: u64, offset: u64, len: usize) -> Result<Vec<u8>, ViewError> {
        trace!(fh, offset, len, "read");
        let entry = self.handles.get_mut(fh).ok_or(ViewError::BadHandle(fh))?;

        let plan = offset::plan_read(self.mode, offset, len);
        let mut out = Vec::with_capacity(len);

        if let Some(range) = plan.prefix {
            // The wrapped key is synthesized on the fly rather than stored.
            let wrapped = self
                .master
                .with_ecb_key(|ecb| ecb_encrypt_block(ecb, &entry.key));
            out.extend_from_slice(&wrapped[range]);
        }

        if plan.body_len > 0 {
            entry.file.seek(SeekFrom::Start(plan.backing_offset))?;
            let mut buf = vec![0u8; plan.body_len];
            let n = mac::read_full(&mut entry.file, &mut buf)?;
            buf.truncate(n);
            out.extend_from_slice(&ctr_apply_at(&entry.key, plan.stream_offset, &buf));
        }

        Ok(out)
    }

    /// Drops a handle, closing the backing file and forgetting its key.
    pub fn release(&mut self, fh: u64) -> Result<(), ViewError> {
        trace!(fh, "release");
        self.handles
            .remove(fh)
            .map(drop)
            .ok_or(ViewError::BadHandle(fh))
    }

    /// File creation is a mutating operation; the view is read-only.
    pub fn create(&mut self, _path: &str, _mode: u32) -> Result<u64, ViewError> {
        Err(ViewError::ReadOnly)
    }

    /// Timestamp updates are mutating operations; the view is read-only.
    pub fn utimens(
        &mut self,
        _path: &str,
        _atime: Option<SystemTime>,
        _mtime: Option<SystemTime>,
    ) -> Result<(), ViewError> {
        Err(ViewError::ReadOnly)
    }
}

fn timestamp(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// Lexical relative path from `base` to `target`, both absolute.
///
/// Mirrors `os.path.relpath`: shared leading components are dropped, each
/// remaining `base` component becomes a `..`.
fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let mut target_parts = target.components().peekable();
    let mut base_parts = base.components().peekable();

    while let (Some(t), Some(b)) = (target_parts.peek(), base_parts.peek()) {
        if t == b {
            target_parts.next();
            base_parts.next();
        } else {
            break;
        }
    }

    let mut rel = PathBuf::new();
    for part in base_parts {
        if part != Component::RootDir {
            rel.push("..");
        }
    }
    for part in target_parts {
        rel.push(part.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}
