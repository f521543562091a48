//! Per-file encrypt/decrypt primitive.
//!
//! The engine only needs two things from a transform: to know whether a file
//! is already in the target state, and to rewrite it in place. Keeping the
//! check separate is what makes re-running a partially completed batch safe.
//!
//! # Envelope format
//!
//! [`AeadFileTransform`] writes:
//!
//! ```text
//! [magic: 8 bytes "SWPCRYP1"][nonce: 12 bytes][AES-256-GCM ciphertext + 16-byte tag]
//! ```
//!
//! The magic is also the associated data, so a header swapped onto another
//! ciphertext fails authentication.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::job::JobMode;

/// Marks a file written by [`AeadFileTransform`].
pub const MAGIC: &[u8; 8] = b"SWPCRYP1";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = MAGIC.len() + NONCE_LEN;

/// Master key length in bytes.
pub const KEY_LEN: usize = 32;

/// Failure to transform one file.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encrypt {}", path.display())]
    Encrypt { path: PathBuf },

    #[error("failed to decrypt {}: {reason}", path.display())]
    Decrypt { path: PathBuf, reason: String },

    #[error("invalid key file {}: {reason}", path.display())]
    InvalidKey { path: PathBuf, reason: String },

    #[error("encryption is not available: no master key configured")]
    Unavailable,
}

impl TransformError {
    fn io(path: &Path, source: io::Error) -> Self {
        TransformError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// The file vanished between being listed and being transformed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransformError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Encrypts or decrypts a single file in place.
pub trait FileTransform: Send + Sync {
    /// Whether a master key is configured.
    fn is_available(&self) -> bool;

    /// Whether `path` already is what `mode` would turn it into.
    fn is_in_target_state(&self, path: &Path, mode: JobMode) -> Result<bool, TransformError>;

    /// Rewrite `path` in place. Must be a no-op for files already in the
    /// target state.
    fn apply(&self, path: &Path, mode: JobMode) -> Result<(), TransformError>;
}

/// AES-256-GCM whole-file envelope, rewritten atomically.
pub struct AeadFileTransform {
    key: Option<Zeroizing<[u8; KEY_LEN]>>,
}

impl std::fmt::Debug for AeadFileTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadFileTransform")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AeadFileTransform {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            key: Some(Zeroizing::new(key)),
        }
    }

    /// A transform with no master key. [`FileTransform::is_available`]
    /// reports false and every `apply` fails.
    pub fn unavailable() -> Self {
        Self { key: None }
    }

    /// Load a key file holding 64 hex characters.
    pub fn from_key_file(path: &Path) -> Result<Self, TransformError> {
        let contents = Zeroizing::new(fs::read_to_string(path).map_err(|e| TransformError::io(path, e))?);
        let bytes = Zeroizing::new(hex::decode(contents.trim()).map_err(|e| {
            TransformError::InvalidKey {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?);

        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| TransformError::InvalidKey {
            path: path.to_path_buf(),
            reason: format!("expected {KEY_LEN} bytes, got {}", bytes.len()),
        })?;
        Ok(Self::new(key))
    }

    /// Write a fresh random key to `path`. Refuses to overwrite.
    pub fn generate_key_file(path: &Path) -> Result<(), TransformError> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut *key);
        let encoded = Zeroizing::new(hex::encode(&*key));

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path).map_err(|e| TransformError::io(path, e))?;
        file.write_all(encoded.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .and_then(|()| file.sync_all())
            .map_err(|e| TransformError::io(path, e))?;
        debug!(path = %path.display(), "Generated key file");
        Ok(())
    }

    fn cipher(&self) -> Result<Aes256Gcm, TransformError> {
        let key = self.key.as_ref().ok_or(TransformError::Unavailable)?;
        // A 32-byte slice always has the right length for AES-256
        Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| TransformError::Unavailable)
    }

    fn encrypt_bytes(&self, path: &Path, plaintext: &[u8]) -> Result<Vec<u8>, TransformError> {
        let cipher = self.cipher()?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: MAGIC,
                },
            )
            .map_err(|_| TransformError::Encrypt {
                path: path.to_path_buf(),
            })?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt_bytes(&self, path: &Path, data: &[u8]) -> Result<Zeroizing<Vec<u8>>, TransformError> {
        let cipher = self.cipher()?;
        if data.len() < HEADER_LEN + TAG_LEN {
            return Err(TransformError::Decrypt {
                path: path.to_path_buf(),
                reason: format!("file too short ({} bytes)", data.len()),
            });
        }

        let (nonce, ciphertext) = data[MAGIC.len()..].split_at(NONCE_LEN);
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: MAGIC,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| TransformError::Decrypt {
                path: path.to_path_buf(),
                reason: "authentication failed (wrong key or corrupted file)".to_string(),
            })
    }
}

fn has_magic(path: &Path) -> Result<bool, TransformError> {
    let mut file = File::open(path).map_err(|e| TransformError::io(path, e))?;
    let mut header = [0u8; MAGIC.len()];
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(TransformError::io(path, e)),
        }
    }
    Ok(&header == MAGIC)
}

/// Replace `path` with `contents`, keeping its permissions.
fn rewrite_atomic(path: &Path, contents: &[u8]) -> Result<(), TransformError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let permissions = fs::metadata(path).map_err(|e| TransformError::io(path, e))?.permissions();

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| TransformError::io(path, e))?;
    temp.write_all(contents)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| TransformError::io(path, e))?;
    fs::set_permissions(temp.path(), permissions).map_err(|e| TransformError::io(path, e))?;
    temp.persist(path).map_err(|e| TransformError::io(path, e.error))?;
    Ok(())
}

impl FileTransform for AeadFileTransform {
    fn is_available(&self) -> bool {
        self.key.is_some()
    }

    fn is_in_target_state(&self, path: &Path, mode: JobMode) -> Result<bool, TransformError> {
        let encrypted = has_magic(path)?;
        Ok(match mode {
            JobMode::Encrypt => encrypted,
            JobMode::Decrypt => !encrypted,
        })
    }

    fn apply(&self, path: &Path, mode: JobMode) -> Result<(), TransformError> {
        if !self.is_available() {
            return Err(TransformError::Unavailable);
        }

        let data = Zeroizing::new(fs::read(path).map_err(|e| TransformError::io(path, e))?);
        let encrypted = data.starts_with(MAGIC);

        match mode {
            JobMode::Encrypt if encrypted => trace!(path = %path.display(), "Already encrypted"),
            JobMode::Decrypt if !encrypted => trace!(path = %path.display(), "Already plaintext"),
            JobMode::Encrypt => {
                let out = self.encrypt_bytes(path, &data)?;
                rewrite_atomic(path, &out)?;
            }
            JobMode::Decrypt => {
                let plaintext = self.decrypt_bytes(path, &data)?;
                rewrite_atomic(path, &plaintext)?;
            }
        }
        Ok(())
    }
}
