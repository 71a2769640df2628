//! Locked-memory secrets
//!
//! A [`Secret`] owns exactly one 32-byte key. The backing pages are locked
//! out of swap (best effort) while the secret is alive, and the bytes are
//! zeroed before the memory is returned. The type has no `Clone`: a secret
//! has a single owner and is moved, never copied.

use zeroize::Zeroize;

/// Length of every key handled by the keyring.
pub const SECRET_LEN: usize = 32;

pub struct Secret {
    bytes: Box<[u8; SECRET_LEN]>,
    locked: bool,
}

impl Secret {
    /// Take ownership of key material. The caller's copy is zeroed.
    pub fn from_bytes(bytes: &mut [u8; SECRET_LEN]) -> Self {
        let mut boxed = Box::new([0u8; SECRET_LEN]);
        boxed.copy_from_slice(bytes);
        bytes.zeroize();

        // best effort: a failed mlock leaves the key swappable but usable
        let locked = unsafe {
            libc::mlock(boxed.as_ptr() as *const libc::c_void, SECRET_LEN) == 0
        };
        Secret {
            bytes: boxed,
            locked,
        }
    }

    /// Mint a fresh random secret.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; SECRET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self::from_bytes(&mut bytes)
    }

    /// Borrow the key material.
    pub fn expose(&self) -> &[u8; SECRET_LEN] {
        &self.bytes
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.bytes.zeroize();
        if self.locked {
            unsafe {
                libc::munlock(self.bytes.as_ptr() as *const libc::c_void, SECRET_LEN);
            }
        }
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}
