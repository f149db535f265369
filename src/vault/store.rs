//! Flat-file record store and atomic index persistence (spec §4.6/§5).
//!
//! Layout under the vault directory: `index.bin` (+ one-generation
//! `index.bin.bak`), `records/<uuid>.bin`, `carriers/<uuid>-<n>.png`,
//! `tokens.bin`.

use crate::vault::error::VaultError;
use crate::vault::primitives;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const RECORD_IO_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct VaultPaths {
    pub dir: PathBuf,
    pub index: PathBuf,
    pub index_bak: PathBuf,
    pub records: PathBuf,
    pub carriers: PathBuf,
    pub tokens: PathBuf,
    /// Plaintext sidecar holding the Argon2 salt and key verifier(s). These
    /// cannot live only inside the AEAD-encrypted index — deriving the key
    /// needed to decrypt the index requires the salt first. Mirrors the
    /// teacher's standalone `vault/.salt` file.
    pub salt: PathBuf,
    /// Decoy Vault Index, encrypted under a duress passphrase's own key
    /// hierarchy. Absent unless duress mode has been configured.
    pub decoy_index: PathBuf,
}

impl VaultPaths {
    fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        VaultPaths {
            index: dir.join("index.bin"),
            index_bak: dir.join("index.bin.bak"),
            records: dir.join("records"),
            carriers: dir.join("carriers"),
            tokens: dir.join("tokens.bin"),
            salt: dir.join(".salt"),
            decoy_index: dir.join("index.decoy.bin"),
            dir,
        }
    }
}

/// Durable storage backing the Vault Index and record bodies. Holds no
/// secrets — every payload that passes through here is already an AEAD
/// envelope string or PNG bytes.
pub struct Store {
    paths: VaultPaths,
}

impl Store {
    pub fn new(vault_dir: impl Into<PathBuf>) -> Self {
        Store {
            paths: VaultPaths::new(vault_dir),
        }
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    pub async fn ensure_dirs(&self) -> Result<(), VaultError> {
        tokio::fs::create_dir_all(&self.paths.dir).await?;
        tokio::fs::create_dir_all(&self.paths.records).await?;
        tokio::fs::create_dir_all(&self.paths.carriers).await?;
        Ok(())
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.paths.index).await.unwrap_or(false)
    }

    /// write-new + fsync + rename, keeping one generation of `.bak`. The old
    /// primary is copied to `.bak` before the rename lands, so a crash
    /// between copy and rename still leaves one authentic index readable.
    pub async fn write_index_atomic(&self, ciphertext: &str) -> Result<(), VaultError> {
        self.ensure_dirs().await?;
        let tmp_path = self.paths.dir.join(format!("index.bin.tmp-{}", primitives::uuid_v4()));

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        use tokio::io::AsyncWriteExt;
        file.write_all(ciphertext.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        if tokio::fs::try_exists(&self.paths.index).await.unwrap_or(false) {
            let _ = tokio::fs::copy(&self.paths.index, &self.paths.index_bak).await;
        }

        tokio::fs::rename(&tmp_path, &self.paths.index).await?;
        Ok(())
    }

    /// Reads the primary index; falls back to the one-generation `.bak` if
    /// the primary is missing or unreadable. Authentication of either copy is
    /// the caller's job (the envelope's own AEAD tag) — a primary that reads
    /// fine as bytes but fails to decrypt is not handled here, see
    /// `read_index_backup`.
    pub async fn read_index_with_fallback(&self) -> Result<String, VaultError> {
        match tokio::fs::read(&self.paths.index).await {
            Ok(bytes) => String::from_utf8(bytes).map_err(|_| VaultError::Corrupt),
            Err(_) => {
                let bytes = tokio::fs::read(&self.paths.index_bak)
                    .await
                    .map_err(|_| VaultError::NotInitialized)?;
                String::from_utf8(bytes).map_err(|_| VaultError::Corrupt)
            }
        }
    }

    /// Reads the one-generation `.bak` copy directly, independent of the
    /// primary's readability. Used when the primary reads fine as bytes but
    /// fails *authentication* (tampered/corrupt ciphertext) — the caller
    /// retries decryption against this copy before giving up, per spec §4.6's
    /// "used if the primary fails authentication".
    pub async fn read_index_backup(&self) -> Result<String, VaultError> {
        let bytes = tokio::fs::read(&self.paths.index_bak)
            .await
            .map_err(|_| VaultError::Corrupt)?;
        String::from_utf8(bytes).map_err(|_| VaultError::Corrupt)
    }

    pub async fn write_record(&self, id: Uuid, ciphertext: &str) -> Result<(), VaultError> {
        self.ensure_dirs().await?;
        let path = self.record_path(id);
        retry_io(|| async { Ok(tokio::fs::write(&path, ciphertext.as_bytes()).await?) }).await
    }

    pub async fn read_record(&self, id: Uuid) -> Result<String, VaultError> {
        let path = self.record_path(id);
        let bytes: Vec<u8> =
            retry_io(|| async { Ok(tokio::fs::read(&path).await?) }).await?;
        String::from_utf8(bytes).map_err(|_| VaultError::Corrupt)
    }

    pub async fn delete_record(&self, id: Uuid) -> Result<(), VaultError> {
        let path = self.record_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Separate slot for a File entry's raw content blob, stored alongside its
    /// record (the record itself only holds `FileMeta`, per spec §3: "its
    /// body is stored as encrypted blob(s) outside the entry record").
    pub async fn write_file_blob(&self, id: Uuid, ciphertext: &str) -> Result<(), VaultError> {
        self.ensure_dirs().await?;
        let path = self.file_blob_path(id);
        retry_io(|| async { Ok(tokio::fs::write(&path, ciphertext.as_bytes()).await?) }).await
    }

    pub async fn read_file_blob(&self, id: Uuid) -> Result<String, VaultError> {
        let path = self.file_blob_path(id);
        let bytes: Vec<u8> = retry_io(|| async { Ok(tokio::fs::read(&path).await?) }).await?;
        String::from_utf8(bytes).map_err(|_| VaultError::Corrupt)
    }

    pub async fn delete_file_blob(&self, id: Uuid) -> Result<(), VaultError> {
        let path = self.file_blob_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_carrier(&self, id: Uuid, index: u16, png_bytes: &[u8]) -> Result<PathBuf, VaultError> {
        self.ensure_dirs().await?;
        let path = self.carrier_path(id, index);
        tokio::fs::write(&path, png_bytes).await?;
        Ok(path)
    }

    pub async fn read_carrier(&self, path: &Path) -> Result<Vec<u8>, VaultError> {
        Ok(tokio::fs::read(path).await?)
    }

    pub async fn delete_carrier(&self, path: &Path) -> Result<(), VaultError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_tokens(&self) -> Result<Option<String>, VaultError> {
        match tokio::fs::read(&self.paths.tokens).await {
            Ok(bytes) => Ok(Some(
                String::from_utf8(bytes).map_err(|_| VaultError::Corrupt)?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_tokens(&self, ciphertext: &str) -> Result<(), VaultError> {
        self.ensure_dirs().await?;
        Ok(tokio::fs::write(&self.paths.tokens, ciphertext.as_bytes()).await?)
    }

    /// Reads the plaintext salt/verifier sidecar. Holds no secrets on its own
    /// (a verifier hash, not a key) but must stay outside the AEAD envelope
    /// since it is what makes decrypting that envelope possible.
    pub async fn read_salt_file(&self) -> Result<Option<String>, VaultError> {
        match tokio::fs::read(&self.paths.salt).await {
            Ok(bytes) => Ok(Some(
                String::from_utf8(bytes).map_err(|_| VaultError::Corrupt)?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_salt_file(&self, contents: &str) -> Result<(), VaultError> {
        self.ensure_dirs().await?;
        Ok(tokio::fs::write(&self.paths.salt, contents.as_bytes()).await?)
    }

    pub async fn read_decoy_index(&self) -> Result<Option<String>, VaultError> {
        match tokio::fs::read(&self.paths.decoy_index).await {
            Ok(bytes) => Ok(Some(
                String::from_utf8(bytes).map_err(|_| VaultError::Corrupt)?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_decoy_index(&self, ciphertext: &str) -> Result<(), VaultError> {
        self.ensure_dirs().await?;
        Ok(tokio::fs::write(&self.paths.decoy_index, ciphertext.as_bytes()).await?)
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.paths.records.join(format!("{id}.bin"))
    }

    fn file_blob_path(&self, id: Uuid) -> PathBuf {
        self.paths.records.join(format!("{id}.blob"))
    }

    fn carrier_path(&self, id: Uuid, index: u16) -> PathBuf {
        self.paths.carriers.join(format!("{id}-{index}.png"))
    }
}

/// Retries a record-body I/O operation up to `RECORD_IO_RETRIES` times with
/// jittered backoff, per §7. Cryptographic failures never go through here —
/// only `std::io::Error`-producing filesystem calls do.
async fn retry_io<F, Fut, T>(mut op: F) -> Result<T, VaultError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, VaultError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < RECORD_IO_RETRIES => {
                attempt += 1;
                let jitter_ms = primitives::random_int(10, 100) as u64 * attempt as u64;
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                tracing::warn!(attempt, "retrying record I/O after error: {e}");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Seam for the out-of-scope cloud-storage collaborator (spec §1/§6). The
/// Vault Index calls through this trait once a record body has been
/// fragmented and embedded into carriers; no implementation ships in this
/// crate, since the collaborator is untrusted network code outside the
/// security-critical core.
pub trait CloudCollaborator: Send + Sync {
    fn upload(&self, bytes: &[u8], name: &str, mime: &str) -> Result<String, VaultError>;
    fn download(&self, handle: &str) -> Result<Vec<u8>, VaultError>;
    fn delete(&self, handle: &str) -> Result<(), VaultError>;
    fn list(&self, folder: &str) -> Result<Vec<String>, VaultError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn index_round_trips_through_atomic_write() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(!store.exists().await);

        store.write_index_atomic("ciphertext-v1").await.unwrap();
        assert!(store.exists().await);
        assert_eq!(store.read_index_with_fallback().await.unwrap(), "ciphertext-v1");

        store.write_index_atomic("ciphertext-v2").await.unwrap();
        assert_eq!(store.read_index_with_fallback().await.unwrap(), "ciphertext-v2");
        assert!(tokio::fs::try_exists(&store.paths().index_bak).await.unwrap());
    }

    #[tokio::test]
    async fn falls_back_to_backup_when_primary_missing() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        store.write_index_atomic("gen-1").await.unwrap();
        store.write_index_atomic("gen-2").await.unwrap();

        tokio::fs::remove_file(&store.paths().index).await.unwrap();
        assert_eq!(store.read_index_with_fallback().await.unwrap(), "gen-1");
    }

    #[tokio::test]
    async fn salt_sidecar_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(store.read_salt_file().await.unwrap().is_none());
        store.write_salt_file("salt-json").await.unwrap();
        assert_eq!(store.read_salt_file().await.unwrap().unwrap(), "salt-json");
    }

    #[tokio::test]
    async fn record_body_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let id = primitives::uuid_v4();
        store.write_record(id, "encrypted-body").await.unwrap();
        assert_eq!(store.read_record(id).await.unwrap(), "encrypted-body");
        store.delete_record(id).await.unwrap();
        assert!(store.read_record(id).await.is_err());
    }
}
