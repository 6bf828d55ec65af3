//! Companion module signature verification

use anyhow::{Context, Result, bail};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use log::{debug, error, warn};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::defaults::SIGNATURE_EXTENSION;

pub trait Signer: fmt::Debug {
    fn verify(&self, module: &Path) -> bool;

    /// Whether `verify` actually checks a signature
    fn checks_signatures(&self) -> bool {
        true
    }
}

/// Detached signature location: `<module>.sig`
pub fn signature_path(module: &Path) -> PathBuf {
    let mut name = OsString::from(module.as_os_str());
    name.push(".");
    name.push(SIGNATURE_EXTENSION);
    PathBuf::from(name)
}

/// Ed25519 signature over the SHA-256 digest of the module file
#[derive(Debug, Clone)]
pub struct Ed25519Signer {
    key: VerifyingKey,
}

impl Ed25519Signer {
    pub fn from_key(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Load a public key from a PEM file
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read public key {}", path.display()))?;
        let parsed = pem::parse(&text)
            .with_context(|| format!("Failed to parse public key PEM {}", path.display()))?;

        let contents = parsed.contents();
        let key_bytes = match parsed.tag() {
            // SubjectPublicKeyInfo wrapping an Ed25519 key
            "PUBLIC KEY" if contents.len() >= 44 && contents[0..2] == [0x30, 0x2a] => &contents[12..44],
            "PUBLIC KEY" if contents.len() == 32 => contents,
            "PUBLIC KEY" => bail!("Invalid public key format"),
            "ED25519 PUBLIC KEY" => contents,
            other => bail!("Unsupported public key type: {}", other),
        };

        let key = VerifyingKey::from_bytes(
            key_bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid public key length"))?,
        )
        .context("Invalid public key")?;

        debug!("🔑 Loaded module signing key from {}", path.display());
        Ok(Self::from_key(key))
    }

    fn read_signature(path: &Path) -> Result<Signature> {
        let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let bytes = match std::str::from_utf8(&raw) {
            Ok(text) if raw.len() != Signature::BYTE_SIZE => {
                hex::decode(text.trim()).context("Signature is not valid hex")?
            }
            _ => raw,
        };
        Signature::from_slice(&bytes).context("Malformed signature")
    }
}

impl Signer for Ed25519Signer {
    fn verify(&self, module: &Path) -> bool {
        let data = match fs::read(module) {
            Ok(data) => data,
            Err(e) => {
                error!("Couldn't read {}: {}", module.display(), e);
                return false;
            }
        };
        let sig_path = signature_path(module);
        let signature = match Self::read_signature(&sig_path) {
            Ok(signature) => signature,
            Err(e) => {
                error!("{:#}", e);
                return false;
            }
        };

        let digest = Sha256::digest(&data);
        let valid = self.key.verify(&digest, &signature).is_ok();
        if valid {
            debug!("🔏 Signature verified for {}", module.display());
        } else {
            error!("Signature mismatch for {}", module.display());
        }
        valid
    }
}

/// Accepts every module
#[derive(Debug, Default)]
pub struct UncheckedSigner;

impl Signer for UncheckedSigner {
    fn verify(&self, module: &Path) -> bool {
        warn!("⚠️ Signature checking disabled, accepting {}", module.display());
        true
    }

    fn checks_signatures(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer as _, SigningKey};
    use tempfile::TempDir;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7; 32])
    }

    fn write_signed(dir: &Path, contents: &[u8], hex_encoded: bool) -> PathBuf {
        let module = dir.join("xse64_0_411_140.dll");
        fs::write(&module, contents).unwrap();
        let signature = signing_key().sign(&Sha256::digest(contents));
        let bytes = signature.to_bytes();
        if hex_encoded {
            fs::write(signature_path(&module), format!("{}\n", hex::encode(bytes))).unwrap();
        } else {
            fs::write(signature_path(&module), bytes).unwrap();
        }
        module
    }

    #[test]
    fn test_signature_path() {
        assert_eq!(
            signature_path(Path::new("/games/xse64_0_411_140.dll")),
            PathBuf::from("/games/xse64_0_411_140.dll.sig")
        );
    }

    #[test]
    fn test_valid_signatures() {
        let temp_dir = TempDir::new().unwrap();
        let signer = Ed25519Signer::from_key(signing_key().verifying_key());

        let module = write_signed(temp_dir.path(), b"module bytes", true);
        assert!(signer.verify(&module));

        let module = write_signed(temp_dir.path(), b"other bytes", false);
        assert!(signer.verify(&module));
    }

    #[test]
    fn test_tampered_module_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let signer = Ed25519Signer::from_key(signing_key().verifying_key());
        let module = write_signed(temp_dir.path(), b"module bytes", true);
        fs::write(&module, b"patched bytes").unwrap();

        assert!(!signer.verify(&module));
    }

    #[test]
    fn test_missing_signature_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let module = temp_dir.path().join("xse64.dll");
        fs::write(&module, b"module bytes").unwrap();

        let signer = Ed25519Signer::from_key(signing_key().verifying_key());
        assert!(!signer.verify(&module));
    }

    #[test]
    fn test_load_spki_pem() {
        let temp_dir = TempDir::new().unwrap();
        let mut der = vec![0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00];
        der.extend_from_slice(signing_key().verifying_key().as_bytes());
        let key_path = temp_dir.path().join("module_key.pem");
        fs::write(&key_path, pem::encode(&pem::Pem::new("PUBLIC KEY", der))).unwrap();

        let signer = Ed25519Signer::from_pem_file(&key_path).unwrap();
        let module = write_signed(temp_dir.path(), b"module bytes", true);
        assert!(signer.verify(&module));
    }

    #[test]
    fn test_load_rejects_other_key_types() {
        let temp_dir = TempDir::new().unwrap();
        let key_path = temp_dir.path().join("key.pem");
        fs::write(&key_path, pem::encode(&pem::Pem::new("PRIVATE KEY", vec![0u8; 48]))).unwrap();
        assert!(Ed25519Signer::from_pem_file(&key_path).is_err());
    }

    #[test]
    fn test_unchecked_signer_accepts() {
        assert!(UncheckedSigner.verify(Path::new("anything.dll")));
        assert!(!UncheckedSigner.checks_signatures());
        assert!(Ed25519Signer::from_key(signing_key().verifying_key()).checks_signatures());
    }
}
