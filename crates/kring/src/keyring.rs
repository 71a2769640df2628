//! Session keyring
//!
//! Both ends of every IPC channel derive the same subkeys from the shared
//! master secret and the session identifier, so no public key ever has to
//! travel over the wire: the child derives the parent's signing keypair
//! deterministically and keeps only the verifying half in use.

use chacha20poly1305::{KeyInit, XChaCha20Poly1305};
use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use skewer_model::Uid;

use crate::{Secret, SECRET_LEN};

const BOX_CONTEXT: &[u8] = b"skewer-ipc-box-v1";
const SIGN_CONTEXT: &[u8] = b"skewer-ipc-sign-v1";

/// The per-session key material: a session identifier plus the master
/// secret, from which the AEAD box key and the signing seed are derived.
pub struct Keyring {
    session: Uid,
    master: Secret,
}

impl Keyring {
    /// Mint a fresh session (parent side).
    pub fn create() -> Self {
        Keyring {
            session: Uid::new(),
            master: Secret::random(),
        }
    }

    /// Rebuild the session keyring from inherited material (child side).
    pub fn from_parts(session: Uid, master: Secret) -> Self {
        Keyring { session, master }
    }

    pub fn session(&self) -> Uid {
        self.session
    }

    /// The master secret, for transfer to a freshly spawned child.
    pub fn master(&self) -> &Secret {
        &self.master
    }

    fn derive(&self, context: &[u8]) -> Zeroizing<[u8; SECRET_LEN]> {
        let mut hasher = Sha512::new();
        hasher.update(self.master.expose());
        hasher.update(self.session.to_bytes());
        hasher.update(context);
        let digest = hasher.finalize();
        let mut out = Zeroizing::new([0u8; SECRET_LEN]);
        out.copy_from_slice(&digest[..SECRET_LEN]);
        out
    }

    /// The AEAD cipher sealing child->parent frames.
    pub fn box_cipher(&self) -> XChaCha20Poly1305 {
        let key = self.derive(BOX_CONTEXT);
        XChaCha20Poly1305::new((&*key).into())
    }

    /// The parent's per-session signing key.
    pub fn signing_key(&self) -> SigningKey {
        let seed = self.derive(SIGN_CONTEXT);
        SigningKey::from_bytes(&seed)
    }

    /// The verifying half, used by children on command frames.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key().verifying_key()
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clone_ring(ring: &Keyring) -> Keyring {
        let mut material = *ring.master.expose();
        Keyring::from_parts(ring.session(), Secret::from_bytes(&mut material))
    }

    #[test]
    fn parent_and_child_derive_identical_keys() {
        let parent = Keyring::create();
        let child = clone_ring(&parent);

        assert_eq!(parent.session(), child.session());
        assert_eq!(
            parent.verifying_key().to_bytes(),
            child.verifying_key().to_bytes()
        );
    }

    #[test]
    fn sessions_are_isolated() {
        let a = Keyring::create();
        let b = Keyring::create();
        assert_ne!(a.verifying_key().to_bytes(), b.verifying_key().to_bytes());
    }
}
