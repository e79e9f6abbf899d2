use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::rngs::OsRng;
use tracing::info;
use x25519_dalek::{PublicKey, StaticSecret};

use super::WireGuardError;
use crate::fsio;

/// Interface key pair, base64 encoded the way `wg` prints them.
#[derive(Clone, PartialEq, Eq)]
pub struct WireGuardKeys {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for WireGuardKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireGuardKeys")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl WireGuardKeys {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            private_key: STANDARD.encode(secret.to_bytes()),
            public_key: STANDARD.encode(public.as_bytes()),
        }
    }

    /// Reads the private key at `path`, or generates one and stores it there
    /// (mode 0600) when the file does not exist yet.
    pub fn load_or_generate(path: &Path) -> Result<Self, WireGuardError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let private_key = contents.trim().to_string();
                let public_key = public_key_from_private(&private_key)?;
                Ok(Self {
                    private_key,
                    public_key,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let keys = Self::generate();
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fsio::ensure_private_dir(parent).map_err(|source| WireGuardError::Write {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                let contents = format!("{}\n", keys.private_key);
                fsio::write_private_atomic(path, contents.as_bytes()).map_err(|source| {
                    WireGuardError::Write {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                info!(path = %path.display(), public_key = %keys.public_key, "Generated WireGuard key pair");
                Ok(keys)
            }
            Err(err) => Err(WireGuardError::Io(err)),
        }
    }
}

pub fn public_key_from_private(private_key: &str) -> Result<String, WireGuardError> {
    let bytes = STANDARD
        .decode(private_key.trim())
        .map_err(|err| WireGuardError::InvalidKey(err.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| WireGuardError::InvalidKey("private key must be 32 bytes".into()))?;
    let secret = StaticSecret::from(bytes);
    Ok(STANDARD.encode(PublicKey::from(&secret).as_bytes()))
}
