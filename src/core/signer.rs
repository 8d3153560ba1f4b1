/// Message signers
///
/// Every message sent to the network is a signed data item. The default
/// signer is derived from the local wallet key file; callers can pass any
/// other `Signer` per request.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signer as _, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// ANS-104 signature type for Ed25519 keys
pub const SIGNATURE_TYPE_ED25519: u16 = 2;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("wallet key file not found at {0}")]
    NotFound(PathBuf),
    #[error("wallet key file already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("invalid wallet key: {0}")]
    InvalidKey(String),
    #[error("wallet I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed wallet key file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Something that can sign data items
pub trait Signer: Send + Sync {
    /// ANS-104 signature type tag
    fn signature_type(&self) -> u16;

    /// Raw public key bytes, stored as the item owner
    fn owner(&self) -> Vec<u8>;

    fn sign(&self, message: &[u8]) -> Vec<u8>;

    /// Wallet address: base64url(SHA-256(owner))
    fn address(&self) -> String {
        address_of(&self.owner())
    }
}

pub fn address_of(owner: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(owner))
}

/// On-disk JWK form of an Ed25519 wallet
#[derive(Debug, Serialize, Deserialize)]
struct WalletKeyFile {
    kty: String,
    crv: String,
    /// Secret seed, base64url
    d: String,
    /// Public key, base64url
    x: String,
}

/// Ed25519 wallet signer
pub struct WalletSigner {
    signing_key: SigningKey,
}

impl std::fmt::Debug for WalletSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSigner")
            .field("address", &self.address())
            .finish()
    }
}

impl WalletSigner {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Create a wallet from fresh OS randomness
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// Load a wallet from a JWK key file
    pub fn load(path: &Path) -> Result<Self, SignerError> {
        if !path.exists() {
            return Err(SignerError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let key: WalletKeyFile = serde_json::from_str(&content)?;

        if key.kty != "OKP" || key.crv != "Ed25519" {
            return Err(SignerError::InvalidKey(format!(
                "unsupported key type {}/{}",
                key.kty, key.crv
            )));
        }

        let seed_bytes = URL_SAFE_NO_PAD
            .decode(key.d.as_bytes())
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let seed: [u8; 32] = seed_bytes.try_into().map_err(|bytes: Vec<u8>| {
            SignerError::InvalidKey(format!("expected 32 byte seed, got {}", bytes.len()))
        })?;

        let signer = Self::from_seed(&seed);
        if URL_SAFE_NO_PAD.encode(signer.public_key()) != key.x {
            return Err(SignerError::InvalidKey(
                "public key does not match secret seed".to_string(),
            ));
        }

        Ok(signer)
    }

    /// Write the wallet as a JWK key file; never overwrites an existing one
    pub fn save(&self, path: &Path) -> Result<(), SignerError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let key = WalletKeyFile {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            d: URL_SAFE_NO_PAD.encode(self.signing_key.to_bytes()),
            x: URL_SAFE_NO_PAD.encode(self.public_key()),
        };
        let contents = serde_json::to_string_pretty(&key)?;

        write_new_secret(path, contents.as_bytes()).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => SignerError::AlreadyExists(path.to_path_buf()),
            _ => SignerError::Io(e),
        })
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

/// Create a new owner-only file; fails if the path already exists
#[cfg(unix)]
fn write_new_secret(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_new_secret(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(contents)
}

impl Signer for WalletSigner {
    fn signature_type(&self) -> u16 {
        SIGNATURE_TYPE_ED25519
    }

    fn owner(&self) -> Vec<u8> {
        self.public_key().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};
    use tempfile::TempDir;

    #[test]
    fn test_signature_verifies() {
        let signer = WalletSigner::from_seed(&[7u8; 32]);
        let signature = signer.sign(b"hello");
        assert_eq!(signature.len(), 64);

        let verifying_key = VerifyingKey::from_bytes(&signer.public_key()).unwrap();
        let signature = Signature::from_bytes(&signature.try_into().unwrap());
        assert!(verifying_key.verify(b"hello", &signature).is_ok());
    }

    #[test]
    fn test_address_is_43_chars() {
        let signer = WalletSigner::from_seed(&[1u8; 32]);
        let address = signer.address();
        assert_eq!(address.len(), 43);
        assert_eq!(address, address_of(&signer.public_key()));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");

        let signer = WalletSigner::generate();
        signer.save(&path).unwrap();

        let loaded = WalletSigner::load(&path).unwrap();
        assert_eq!(loaded.public_key(), signer.public_key());
    }

    #[test]
    fn test_save_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");

        WalletSigner::generate().save(&path).unwrap();
        let err = WalletSigner::generate().save(&path).unwrap_err();
        assert!(matches!(err, SignerError::AlreadyExists(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys").join("wallet.json");

        let original = WalletSigner::generate();
        original.save(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let err = WalletSigner::generate().save(&path).unwrap_err();
        assert!(matches!(err, SignerError::AlreadyExists(ref p) if p == &path));
        let kept = WalletSigner::load(&path).unwrap();
        assert_eq!(kept.public_key(), original.public_key());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = WalletSigner::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, SignerError::NotFound(_)));
    }

    #[test]
    fn test_load_rejects_mismatched_public_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");
        let other = WalletSigner::from_seed(&[2u8; 32]);
        let content = serde_json::json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "d": URL_SAFE_NO_PAD.encode([1u8; 32]),
            "x": URL_SAFE_NO_PAD.encode(other.public_key()),
        });
        fs::write(&path, content.to_string()).unwrap();

        let err = WalletSigner::load(&path).unwrap_err();
        assert!(matches!(err, SignerError::InvalidKey(_)));
    }
}
