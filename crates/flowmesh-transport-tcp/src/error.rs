//! Error taxonomy for the wire transport and control plane (spec §4.8, §4.9,
//! §7 "Transport" and "Control plane" categories). Variant names are the
//! stable, user-facing category names from spec §7 — never formatted with
//! the secret or raw payload bytes.

/// Errors raised verifying or framing a [`crate::wire::WireEnvelope`]
/// (spec §4.8 "Verification on receive").
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bind_host must be 127.0.0.1")]
    BindPolicy,
    #[error("declared frame length {declared} exceeds max_payload_bytes {max}")]
    WirePayloadTooLarge { declared: u32, max: u32 },
    #[error("frame did not parse as a JSON object")]
    MalformedFrame,
    #[error("frame is missing a signature")]
    MissingSignature,
    #[error("frame kind '{0}' is not in allowed_kinds")]
    UnsupportedKind(String),
    #[error("frame timestamp is outside the configured TTL window")]
    TimestampExpired,
    #[error("frame is missing a nonce")]
    MissingNonce,
    #[error("frame signature does not match the configured secret")]
    InvalidSignature,
    #[error("nonce '{0}' was already seen within the TTL window")]
    ReplayNonce(String),
    #[error("io error during {0}: {1}")]
    Io(&'static str, #[source] std::io::Error),
    #[error("frame serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors raised by [`crate::control::ControlPlaneSession`] transitions
/// (spec §4.9 "Transitions").
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("worker '{0}' sent a control message before completing bootstrap")]
    Protocol(String),
    #[error("worker '{0}' sent bootstrap_bundle twice")]
    DuplicateBootstrap(String),
    #[error("start_work requested before all required workers reported ready: {missing:?}")]
    StartBeforeReady { missing: Vec<String> },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised by the one-shot bootstrap key channel (spec §3
/// "Key bundle single-shot").
#[derive(Debug, thiserror::Error)]
pub enum BootstrapChannelError {
    #[error("bootstrap key channel already published")]
    AlreadyPublished,
    #[error("bootstrap key channel already received")]
    AlreadyReceived,
    #[error("bootstrap key channel has not been published yet")]
    NotPublished,
}
