//! IPC frame codec
//!
//! `len: u32 BE | header (ASCII command, <= 255 bytes) | 0x20 | payload |
//! auth`. Parent->child frames carry an ed25519 signature as `auth`;
//! child->parent frames are sealed whole (24-byte nonce followed by the
//! AEAD ciphertext, the Poly1305 tag doubling as `auth`).

use chacha20poly1305::aead::{Aead, AeadCore, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::KringError;

/// Upper bound on one frame body, length prefix excluded.
pub const MAX_FRAME_LEN: u32 = 32 * 1024 * 1024;

/// ed25519 signature length.
pub const SIGNATURE_LEN: usize = 64;

const MAX_HEADER_LEN: usize = 255;
const NONCE_LEN: usize = 24;

/// One demarcated IPC frame: an ASCII command plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(command: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame {
            command: command.into(),
            payload: payload.into(),
        }
    }

    /// A frame with no payload.
    pub fn bare(command: impl Into<String>) -> Self {
        Frame::new(command, Vec::new())
    }

    fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.command.len() + 1 + self.payload.len());
        body.extend_from_slice(self.command.as_bytes());
        body.push(b' ');
        body.extend_from_slice(&self.payload);
        body
    }

    fn from_body(body: &[u8]) -> Result<Self, KringError> {
        let sep = body
            .iter()
            .position(|&b| b == b' ')
            .ok_or(KringError::Malformed)?;
        if sep == 0 || sep > MAX_HEADER_LEN {
            return Err(KringError::Malformed);
        }
        let command = std::str::from_utf8(&body[..sep])
            .map_err(|_| KringError::Malformed)?
            .to_string();
        if !command.is_ascii() {
            return Err(KringError::Malformed);
        }
        Ok(Frame {
            command,
            payload: body[sep + 1..].to_vec(),
        })
    }
}

/// Direction-specific frame credentials.
///
/// `Sign`/`Seal` are the producing ends, `Verify`/`Open` the consuming ones.
pub enum FrameCodec {
    Sign(SigningKey),
    Verify(VerifyingKey),
    Seal(XChaCha20Poly1305),
    Open(XChaCha20Poly1305),
}

impl FrameCodec {
    /// Encode one frame body (without the length prefix).
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, KringError> {
        if frame.command.len() > MAX_HEADER_LEN || !frame.command.is_ascii() {
            return Err(KringError::Malformed);
        }
        let body = frame.body();
        match self {
            FrameCodec::Sign(key) => {
                let signature = key.sign(&body);
                let mut out = body;
                out.extend_from_slice(&signature.to_bytes());
                Ok(out)
            }
            FrameCodec::Seal(cipher) => {
                let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, body.as_slice())
                    .map_err(|_| KringError::BadSeal)?;
                let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                out.extend_from_slice(&nonce);
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
            _ => Err(KringError::Malformed),
        }
    }

    /// Decode and authenticate one frame body (without the length prefix).
    pub fn decode(&self, body: &[u8]) -> Result<Frame, KringError> {
        match self {
            FrameCodec::Verify(key) => {
                if body.len() < SIGNATURE_LEN + 2 {
                    return Err(KringError::Malformed);
                }
                let (content, sig_bytes) = body.split_at(body.len() - SIGNATURE_LEN);
                let signature = Signature::from_slice(sig_bytes)
                    .map_err(|_| KringError::BadSignature)?;
                key.verify(content, &signature)
                    .map_err(|_| KringError::BadSignature)?;
                Frame::from_body(content)
            }
            FrameCodec::Open(cipher) => {
                let content = open_blob(cipher, body)?;
                Frame::from_body(&content)
            }
            _ => Err(KringError::Malformed),
        }
    }
}

/// Seal an opaque buffer (nonce-prefixed). Used for store payloads, stash
/// relays and the remote logger stream.
pub fn seal_blob(cipher: &XChaCha20Poly1305, plain: &[u8]) -> Result<Vec<u8>, KringError> {
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plain)
        .map_err(|_| KringError::BadSeal)?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a buffer produced by [`seal_blob`].
pub fn open_blob(cipher: &XChaCha20Poly1305, sealed: &[u8]) -> Result<Vec<u8>, KringError> {
    if sealed.len() < NONCE_LEN + 16 {
        return Err(KringError::Malformed);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| KringError::BadSeal)
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod frame_test;
