//! Transport secret handling (spec §9 "Transport secret handling"):
//! "read the secret into a dedicated type that never implements a default
//! stringifier; all error paths must redact." [`Secret`] is that type —
//! its `Debug` impl never prints its bytes, and generated-secret mode
//! derives a signing key from 32 bytes of CSPRNG master material via
//! HKDF-SHA256, matching the spec's "secret_mode" / "kdf" fields on
//! [`crate::keybundle::BootstrapKeyBundle`].

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

/// Opaque secret bytes. Deliberately has no `Display` and a redacting
/// `Debug`; the only way to get the bytes back out is [`Secret::expose`].
#[derive(Clone)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// 32 bytes of CSPRNG master material (spec §9 "generated-secret mode").
    pub fn generate_master() -> Self {
        let mut bytes = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Derives a signing key from this secret as master material via
    /// HKDF-SHA256, with `info` distinguishing derived keys by purpose
    /// (e.g. `b"flowmesh-ipc-signing-v1"`).
    pub fn derive(&self, info: &[u8], out_len: usize) -> Secret {
        let hk = Hkdf::<Sha256>::new(None, &self.0);
        let mut okm = vec![0u8; out_len];
        hk.expand(info, &mut okm).expect("HKDF output length is within RFC 5869 bounds");
        Secret(okm)
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Secret").field(&"<redacted>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_the_bytes() {
        let secret = Secret::from_bytes(vec![0xAAu8; 32]);
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("170")); // 0xAA == 170
        assert_eq!(rendered, "Secret(\"<redacted>\")");
    }

    #[test]
    fn derive_is_deterministic_for_the_same_info() {
        let master = Secret::from_bytes(vec![1u8; 32]);
        let a = master.derive(b"signing", 32);
        let b = master.derive(b"signing", 32);
        assert_eq!(a.expose(), b.expose());
        let c = master.derive(b"other", 32);
        assert_ne!(a.expose(), c.expose());
    }
}
