//! Chat stream cipher and known-plaintext key recovery.
//!
//! The client ciphers the body of every chat message with a 20-byte key:
//!
//!   C[i] = P[i] ^ key[(i + fp + 1) % 20]
//!
//! where `fp` is the message's fingerprint byte and `i` is the offset
//! inside the ciphered span. The server echoes the plaintext of the
//! sender's own message back, so one (C, P) pair of 20 bytes is enough to
//! read the whole key.
//!
//! Recovered keys derive ZeroizeOnDrop, like every other piece of key
//! material in the workspace.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::wire::CIPHER_KEY_LEN;

// ── Key ───────────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MessageKey([u8; CIPHER_KEY_LEN]);

impl MessageKey {
    pub fn new(bytes: [u8; CIPHER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CIPHER_KEY_LEN] {
        &self.0
    }

    /// Keystream byte for offset `i` of a message with fingerprint `fp`.
    pub fn stream_byte(&self, fp: u8, i: usize) -> u8 {
        self.0[(i + fp as usize + 1) % CIPHER_KEY_LEN]
    }

    /// XOR `data` in place with the keystream. Ciphers and deciphers.
    pub fn apply(&self, fp: u8, data: &mut [u8]) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.stream_byte(fp, i);
        }
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageKey({})", hex::encode(self.0))
    }
}

/// Recover the key from one ciphered segment and its plaintext echo.
///
/// `derived[i] = P[i] ^ C[i]` is `key[(i + start) % 20]` with
/// `start = (fp + 1) % 20`, so the key is `derived` rotated right by `start`.
pub fn recover_key(
    fp: u8,
    ciphertext: &[u8; CIPHER_KEY_LEN],
    plaintext: &[u8; CIPHER_KEY_LEN],
) -> MessageKey {
    let mut derived = [0u8; CIPHER_KEY_LEN];
    for (i, byte) in derived.iter_mut().enumerate() {
        *byte = ciphertext[i] ^ plaintext[i];
    }

    let start = (fp as usize + 1) % CIPHER_KEY_LEN;
    derived.rotate_right(start);
    MessageKey(derived)
}

// ── Recovery State ────────────────────────────────────────────────────────────

/// An outbound chat segment waiting for its plaintext echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCapture {
    pub fingerprint: u8,
    pub ciphertext: [u8; CIPHER_KEY_LEN],
}

/// Per-session recovery progress. At most one capture is outstanding; a
/// newer capture replaces the older one.
#[derive(Debug, Default)]
pub struct KeyRecovery {
    pending: Option<PendingCapture>,
    key: Option<MessageKey>,
}

impl KeyRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self) -> Option<&MessageKey> {
        self.key.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingCapture> {
        self.pending.as_ref()
    }

    /// True while no key is known; captures are ignored afterwards.
    pub fn wants_capture(&self) -> bool {
        self.key.is_none()
    }

    /// True when an echo would complete recovery.
    pub fn awaiting_echo(&self) -> bool {
        self.key.is_none() && self.pending.is_some()
    }

    pub fn capture(&mut self, fingerprint: u8, ciphertext: [u8; CIPHER_KEY_LEN]) {
        if self.wants_capture() {
            self.pending = Some(PendingCapture {
                fingerprint,
                ciphertext,
            });
        }
    }

    /// Drop the pending capture without recovering anything.
    pub fn discard(&mut self) {
        self.pending = None;
    }

    /// Complete recovery with the echoed plaintext. The pending capture is
    /// consumed either way.
    pub fn resolve(&mut self, plaintext: &[u8; CIPHER_KEY_LEN]) -> Option<&MessageKey> {
        let pending = self.pending.take()?;
        if self.key.is_none() {
            self.key = Some(recover_key(pending.fingerprint, &pending.ciphertext, plaintext));
        }
        self.key.as_ref()
    }
}
