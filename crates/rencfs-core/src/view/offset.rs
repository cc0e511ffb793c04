//! Offset arithmetic between the mounted view and the backing file.
//!
//! The two coordinate systems differ by exactly the 16-byte wrapped-key
//! prefix: in encrypt mode the view is shifted +16 relative to the backing
//! plaintext, in decrypt mode -16 relative to the backing ciphertext. The
//! planner keeps all of that arithmetic in one pure, exhaustively testable
//! place; actual I/O and cipher work happen in the read pipeline.

use std::ops::Range;

use crate::view::Mode;
use crate::view::mac::MAC_SIZE;

/// How to serve one random-access read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPlan {
    /// Sub-range of the 16-byte wrapped key to synthesize ahead of the body
    /// (encrypt mode only, when the request starts inside the prefix).
    pub prefix: Option<Range<usize>>,
    /// Offset in the backing file where the body read starts.
    pub backing_offset: u64,
    /// Plaintext-coordinate offset of the body; determines the CTR counter
    /// and the zero-pad for unaligned starts.
    pub stream_offset: u64,
    /// Number of body bytes to request from the backing file. The backing
    /// read may come up short at EOF; the response truncates with it.
    pub body_len: usize,
}

/// Maps a view-visible `(offset, len)` request onto the backing file.
pub fn plan_read(mode: Mode, offset: u64, len: usize) -> ReadPlan {
    match mode {
        Mode::Encrypt => {
            let mac_size = MAC_SIZE as u64;
            if offset < mac_size {
                // The request starts inside the wrapped-key prefix.
                let start = offset as usize;
                let end = MAC_SIZE.min(start + len);
                let body_len = len - (end - start);
                ReadPlan {
                    prefix: Some(start..end),
                    backing_offset: 0,
                    stream_offset: 0,
                    body_len,
                }
            } else {
                let body_offset = offset - mac_size;
                ReadPlan {
                    prefix: None,
                    backing_offset: body_offset,
                    stream_offset: body_offset,
                    body_len: len,
                }
            }
        }
        Mode::Decrypt => ReadPlan {
            prefix: None,
            backing_offset: offset + MAC_SIZE as u64,
            stream_offset: offset,
            body_len: len,
        },
    }
}
