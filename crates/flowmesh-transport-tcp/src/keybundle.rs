//! `BootstrapKeyBundle` (spec §3) and the one-shot channel that delivers it
//! from parent to child exactly once (spec §8 "Key bundle single-shot").

use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::BootstrapChannelError;
use crate::secret::Secret;

/// `{ secret_mode, kdf, master_secret, signing_secret }` from spec §3.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExecutionIpcKeys {
    pub secret_mode: String,
    pub kdf: String,
    pub master_secret_b64: String,
    pub signing_secret_b64: String,
}

impl ExecutionIpcKeys {
    /// Generates a fresh 32-byte CSPRNG master secret and derives the
    /// HMAC signing key from it via HKDF-SHA256 (spec §9).
    pub fn generate() -> Self {
        let master = Secret::generate_master();
        let signing = master.derive(b"flowmesh-ipc-signing-v1", 32);
        Self {
            secret_mode: "generated".to_string(),
            kdf: "hkdf-sha256".to_string(),
            master_secret_b64: BASE64.encode(master.expose()),
            signing_secret_b64: BASE64.encode(signing.expose()),
        }
    }

    pub fn signing_secret(&self) -> Result<Secret, base64::DecodeError> {
        Ok(Secret::from_bytes(BASE64.decode(&self.signing_secret_b64)?))
    }
}

/// `{ created_at_epoch, execution_ipc }` from spec §3.
#[derive(Clone, Serialize, Deserialize)]
pub struct BootstrapKeyBundle {
    pub created_at_epoch: u64,
    pub execution_ipc: ExecutionIpcKeys,
}

impl BootstrapKeyBundle {
    pub fn generate(created_at_epoch: u64) -> Self {
        Self {
            created_at_epoch,
            execution_ipc: ExecutionIpcKeys::generate(),
        }
    }

    /// `bootstrap_bundle_to_wire` from spec §8's round-trip law — in this
    /// crate the wire shape is just the `serde`-derived JSON `Value`, since
    /// the bundle already only carries base64 strings and plain scalars.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("BootstrapKeyBundle always serializes")
    }

    pub fn from_wire(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[derive(Default)]
enum ChannelState {
    #[default]
    Empty,
    Published(BootstrapKeyBundle),
    Received,
}

/// One-shot delivery channel for a [`BootstrapKeyBundle`] (spec §4.10
/// `load_bootstrap_channel`). `publish_once` may be called exactly once;
/// `receive_once` consumes the bundle and may likewise be called exactly
/// once. Both after-the-first calls fail with [`BootstrapChannelError`].
#[derive(Default)]
pub struct BootstrapKeyChannel {
    state: Mutex<ChannelState>,
}

impl BootstrapKeyChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_once(&self, bundle: BootstrapKeyBundle) -> Result<(), BootstrapChannelError> {
        let mut state = self.state.lock().expect("bootstrap key channel mutex poisoned");
        match *state {
            ChannelState::Empty => {
                *state = ChannelState::Published(bundle);
                Ok(())
            }
            ChannelState::Published(_) | ChannelState::Received => Err(BootstrapChannelError::AlreadyPublished),
        }
    }

    pub fn receive_once(&self) -> Result<BootstrapKeyBundle, BootstrapChannelError> {
        let mut state = self.state.lock().expect("bootstrap key channel mutex poisoned");
        match std::mem::replace(&mut *state, ChannelState::Received) {
            ChannelState::Published(bundle) => Ok(bundle),
            ChannelState::Received => {
                *state = ChannelState::Received;
                Err(BootstrapChannelError::AlreadyReceived)
            }
            ChannelState::Empty => {
                *state = ChannelState::Empty;
                Err(BootstrapChannelError::NotPublished)
            }
        }
    }
}
