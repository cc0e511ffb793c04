//! FUSE bridge for the rencfs reverse-encrypting view.
//!
//! This crate adapts the path-based engine in `rencfs-core` to fuser's
//! inode-based protocol and ships the `rencfs` binary. The mount is
//! read-only and single-threaded: fuser's session loop processes one
//! request at a time, which is the concurrency contract the engine's
//! handle table relies on.
//!
//! # Usage
//!
//! ```ignore
//! use rencfs_core::{CipherView, MasterKey, Mode};
//! use rencfs_fuse::RencFs;
//!
//! let master = MasterKey::from_passphrase(b"passphrase");
//! let view = CipherView::new("/srv/plain", master, Mode::Encrypt);
//! let session = fuser::spawn_mount2(RencFs::new(view), mountpoint, &options)?;
//! // ... dropping the session unmounts
//! ```

pub mod error;
pub mod filesystem;
pub mod inode;

pub use error::{ToErrno, io_error_to_errno};
pub use filesystem::RencFs;
pub use inode::{InodeTable, ROOT_INODE};
