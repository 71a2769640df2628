//! Session keyring and IPC framing
//!
//! On startup the parent mints a session identifier and a master secret.
//! Children inherit the master secret over a pipe and re-derive the same
//! subkeys, so both sides can:
//!
//! - verify parent->child command frames (ed25519 signature per frame)
//! - open child->parent event frames (XChaCha20-Poly1305, sealed per frame)
//!
//! Secrets live in `mlock`ed memory and are zeroed on drop; see [`Secret`].
//!
//! Frame format: `len: u32 BE | header (ASCII command) | 0x20 | payload |
//! auth`. The scanner drops frames that fail verification and gives up after
//! eight consecutive failures.

mod frame;
mod keyring;
mod scanner;
mod secret;

pub use frame::{open_blob, seal_blob, Frame, FrameCodec, MAX_FRAME_LEN, SIGNATURE_LEN};
pub use keyring::Keyring;
pub use scanner::{FrameReader, FrameWriter, MAX_CONSECUTIVE_BAD_FRAMES};
pub use secret::{Secret, SECRET_LEN};

use thiserror::Error;

/// Errors from keyring and framing operations.
#[derive(Debug, Error)]
pub enum KringError {
    /// Frame failed signature verification
    #[error("frame signature verification failed")]
    BadSignature,

    /// Frame failed authenticated decryption
    #[error("frame failed to decrypt")]
    BadSeal,

    /// Frame structure is invalid (missing separator, oversized header, ...)
    #[error("malformed frame")]
    Malformed,

    /// Frame length prefix exceeds the allowed maximum
    #[error("frame of {0} bytes exceeds the maximum")]
    Oversized(u32),

    /// Too many consecutive undecodable frames on one channel
    #[error("too many consecutive bad frames, channel is compromised")]
    TooManyBadFrames,

    /// Reading or writing a frame failed
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}
