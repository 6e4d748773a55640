//! Opaque pagination cursor codec.
//!
//! Wraps an internal resume position in ChaCha20-Poly1305 authenticated
//! encryption under the process-wide cursor secret, so callers receive an
//! unguessable, non-parseable token. A cursor that fails authentication,
//! is malformed, or was minted for a different scope is rejected with
//! [`EngineError::InvalidCursor`] — never coerced.
//!
//! Rotating the secret (see
//! [`EngineSettings::rotate_cursor_secret`](crate::config::EngineSettings::rotate_cursor_secret))
//! invalidates every outstanding cursor; callers restart pagination from the
//! beginning.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::types::{EngineError, Result, ScopeId};

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// Internal pagination position wrapped by a cursor.
///
/// `after` is whatever resume state the issuing query needs (sort values and
/// the last document id); its structure is never exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Scope the cursor was minted for.
    pub scope: String,
    /// Query resume state.
    pub after: serde_json::Value,
}

impl CursorPosition {
    pub fn new(scope: &ScopeId, after: serde_json::Value) -> Self {
        Self {
            scope: scope.as_str().to_string(),
            after,
        }
    }
}

/// Encoder/decoder for opaque cursors.
#[derive(Clone)]
pub struct CursorCodec {
    settings: Arc<EngineSettings>,
}

impl CursorCodec {
    pub fn new(settings: Arc<EngineSettings>) -> Self {
        Self { settings }
    }

    /// Encrypt a position into an opaque URL-safe token.
    pub fn encode(&self, position: &CursorPosition) -> Result<String> {
        let plaintext = serde_json::to_vec(position)
            .map_err(|e| EngineError::Internal(format!("cursor serialization failed: {e}")))?;

        let secret = self.settings.cursor_secret();
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&secret));

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| EngineError::Internal(format!("cursor encryption failed: {e}")))?;

        let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(framed))
    }

    /// Decrypt and validate a cursor for the scope of the current request.
    ///
    /// Any failure — bad encoding, failed authentication, or a scope
    /// mismatch — collapses to `InvalidCursor`; the caller discards
    /// pagination state and restarts.
    pub fn decode(&self, cursor: &str, expected_scope: &ScopeId) -> Result<CursorPosition> {
        let framed = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|_| EngineError::InvalidCursor)?;

        if framed.len() < NONCE_LEN + AUTH_TAG_LEN {
            return Err(EngineError::InvalidCursor);
        }
        let (nonce, ciphertext) = framed.split_at(NONCE_LEN);

        let secret = self.settings.cursor_secret();
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&secret));

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| EngineError::InvalidCursor)?;

        let position: CursorPosition =
            serde_json::from_slice(&plaintext).map_err(|_| EngineError::InvalidCursor)?;

        if position.scope != expected_scope.as_str() {
            return Err(EngineError::InvalidCursor);
        }

        Ok(position)
    }
}
