//! Vault Index & Record Store (spec §4.6): the durable encrypted index
//! mapping record IDs to encrypted titles, metadata and carrier references,
//! plus the CRUD contract the external UI/CLI consume. Composes every other
//! module in this tree: `keys` for the key hierarchy, `envelope` for AEAD,
//! `fragment`/`stego` for the carrier-binding pipeline, and `store` for the
//! on-disk layout and its atomic-write discipline.

pub mod envelope;
pub mod error;
pub mod fragment;
pub mod keys;
pub mod primitives;
pub mod stego;
pub mod store;
pub mod types;

pub use error::{AuthError, CryptoError, FragmentError, StegoError, VaultError};
pub use store::{CloudCollaborator, VaultPaths};
pub use types::*;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use keys::KeyHolder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use store::Store;
use tokio::sync::RwLock;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

pub const CURRENT_VAULT_VERSION: &str = "1";

/// Plaintext sidecar (`.salt`) living next to `index.bin`. Holds exactly what
/// §4.2 needs available *before* any decryption can happen: the Argon2 salt
/// and a verifier hash per configured passphrase (real, and optionally
/// duress). Never holds key material itself.
#[derive(Serialize, Deserialize, Clone)]
struct Bootstrap {
    version: String,
    salt: String,
    key_verifier: String,
    duress_salt: Option<String>,
    duress_verifier: Option<String>,
}

/// The single in-process vault: lifecycle operations plus the entry CRUD
/// contract. Cheap to clone — every field is itself reference-counted, same
/// shape as the teacher's `Vault`.
#[derive(Clone)]
pub struct Vault {
    store: Arc<Store>,
    keys: Arc<KeyHolder>,
    index: Arc<RwLock<Option<VaultIndex>>>,
    duress_active: Arc<AtomicBool>,
    decoy_ratio: u32,
}

impl Vault {
    pub fn new(vault_dir: impl Into<PathBuf>, auto_lock: Duration, decoy_ratio: u32) -> Self {
        Vault {
            store: Arc::new(Store::new(vault_dir)),
            keys: Arc::new(KeyHolder::new(auto_lock)),
            index: Arc::new(RwLock::new(None)),
            duress_active: Arc::new(AtomicBool::new(false)),
            decoy_ratio,
        }
    }

    pub fn paths(&self) -> &VaultPaths {
        self.store.paths()
    }

    // --- Lifecycle (spec §4.6) ---

    pub async fn exists(&self) -> bool {
        self.store.exists().await
    }

    pub async fn init(&self, passphrase: &str) -> Result<(), VaultError> {
        if self.store.exists().await {
            return Err(VaultError::AlreadyInitialized);
        }

        let salt = primitives::random_bytes(32);
        let salt_b64 = BASE64.encode(&salt);

        let mut master = keys::derive_master(passphrase, &salt)?;
        let verifier_hex = primitives::hex_encode(&keys::master_verifier(&master));
        let now = primitives::now_millis();

        let bootstrap = Bootstrap {
            version: CURRENT_VAULT_VERSION.to_string(),
            salt: salt_b64.clone(),
            key_verifier: verifier_hex.clone(),
            duress_salt: None,
            duress_verifier: None,
        };
        self.store
            .write_salt_file(&serde_json::to_string(&bootstrap)?)
            .await?;

        let index = VaultIndex::new(CURRENT_VAULT_VERSION, &salt_b64, &verifier_hex, now);

        self.keys.unlock(&master);
        master.zeroize();

        self.persist_index(&index).await?;
        *self.index.write().await = Some(index);
        self.duress_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub async fn unlock(&self, passphrase: &str) -> Result<(), VaultError> {
        if !self.store.exists().await {
            return Err(VaultError::NotInitialized);
        }
        let bootstrap_json = self
            .store
            .read_salt_file()
            .await?
            .ok_or(VaultError::Corrupt)?;
        let bootstrap: Bootstrap = serde_json::from_str(&bootstrap_json)?;

        let salt = BASE64.decode(&bootstrap.salt).map_err(|_| VaultError::Corrupt)?;
        let mut master = keys::derive_master(passphrase, &salt)?;
        let candidate = primitives::hex_encode(&keys::master_verifier(&master));

        if primitives::constant_time_eq(candidate.as_bytes(), bootstrap.key_verifier.as_bytes()) {
            let ciphertext = self.store.read_index_with_fallback().await?;
            let index_key = Zeroizing::new(keys::derive_subkey(&master, keys::LABEL_INDEX_KEY, 32));
            let primary_result: Result<VaultIndex, VaultError> =
                envelope::decrypt_object(&ciphertext, &index_key, CURRENT_VAULT_VERSION.as_bytes())
                    .map_err(VaultError::from);

            // Primary read fine as bytes but failed authentication (tampered
            // or corrupt) — retry once against the one-generation `.bak`
            // before giving up, per spec §4.6.
            let index = match primary_result {
                Ok(index) => index,
                Err(VaultError::Crypto(_)) => {
                    let backup_ciphertext = self.store.read_index_backup().await?;
                    envelope::decrypt_object(
                        &backup_ciphertext,
                        &index_key,
                        CURRENT_VAULT_VERSION.as_bytes(),
                    )?
                }
                Err(e) => return Err(e),
            };
            drop(index_key);

            self.keys.unlock(&master);
            master.zeroize();
            *self.index.write().await = Some(index);
            self.duress_active.store(false, Ordering::SeqCst);
            return Ok(());
        }

        // Real passphrase didn't match; try the duress passphrase if one is
        // configured (spec §4.6: "swap to the decoy index and set a
        // process-wide duress flag").
        if let (Some(duress_salt_b64), Some(duress_verifier)) =
            (&bootstrap.duress_salt, &bootstrap.duress_verifier)
        {
            let duress_salt =
                BASE64.decode(duress_salt_b64).map_err(|_| VaultError::Corrupt)?;
            let mut duress_master = keys::derive_master(passphrase, &duress_salt)?;
            let duress_candidate = primitives::hex_encode(&keys::master_verifier(&duress_master));

            if primitives::constant_time_eq(duress_candidate.as_bytes(), duress_verifier.as_bytes()) {
                let decoy_ciphertext = self
                    .store
                    .read_decoy_index()
                    .await?
                    .ok_or(VaultError::Corrupt)?;
                let decoy_index_key =
                    Zeroizing::new(keys::derive_subkey(&duress_master, keys::LABEL_INDEX_KEY, 32));
                let decoy: VaultIndex = envelope::decrypt_object(
                    &decoy_ciphertext,
                    &decoy_index_key,
                    CURRENT_VAULT_VERSION.as_bytes(),
                )?;
                drop(decoy_index_key);

                self.keys.unlock(&duress_master);
                duress_master.zeroize();
                *self.index.write().await = Some(decoy);
                self.duress_active.store(true, Ordering::SeqCst);
                return Ok(());
            }
            duress_master.zeroize();
        }

        master.zeroize();
        Err(VaultError::Auth(AuthError::BadPassphrase))
    }

    pub fn lock(&self) {
        self.keys.lock();
        if let Ok(mut guard) = self.index.try_write() {
            *guard = None;
        }
        self.duress_active.store(false, Ordering::SeqCst);
    }

    pub fn is_unlocked(&self) -> bool {
        self.keys.is_unlocked()
    }

    /// Observable only through this call, never through `is_unlocked()` — a
    /// caller watching for duress must ask explicitly (spec §4.6).
    pub fn is_duress(&self) -> bool {
        self.duress_active.load(Ordering::SeqCst)
    }

    /// Configures a duress passphrase against a freshly-created, empty decoy
    /// index. Requires the vault to be unlocked with the *real* passphrase.
    /// Calling this while already in duress mode is rejected — a decoy
    /// vault must never be able to configure another decoy underneath it.
    pub async fn configure_duress(&self, duress_passphrase: &str) -> Result<(), VaultError> {
        if self.is_duress() {
            return Err(VaultError::Locked);
        }
        if !self.is_unlocked() {
            return Err(VaultError::Locked);
        }

        let duress_salt = primitives::random_bytes(32);
        let mut duress_master = keys::derive_master(duress_passphrase, &duress_salt)?;
        let duress_verifier_hex = primitives::hex_encode(&keys::master_verifier(&duress_master));
        let now = primitives::now_millis();

        let decoy_index = VaultIndex::new(
            CURRENT_VAULT_VERSION,
            &BASE64.encode(&duress_salt),
            &duress_verifier_hex,
            now,
        );
        let decoy_index_key =
            Zeroizing::new(keys::derive_subkey(&duress_master, keys::LABEL_INDEX_KEY, 32));
        let decoy_ciphertext = envelope::encrypt_object(
            &decoy_index,
            &decoy_index_key,
            CURRENT_VAULT_VERSION.as_bytes(),
        )?;
        drop(decoy_index_key);
        self.store.write_decoy_index(&decoy_ciphertext).await?;
        duress_master.zeroize();

        let bootstrap_json = self
            .store
            .read_salt_file()
            .await?
            .ok_or(VaultError::Corrupt)?;
        let mut bootstrap: Bootstrap = serde_json::from_str(&bootstrap_json)?;
        bootstrap.duress_salt = Some(BASE64.encode(&duress_salt));
        bootstrap.duress_verifier = Some(duress_verifier_hex);
        self.store
            .write_salt_file(&serde_json::to_string(&bootstrap)?)
            .await?;

        let marker = self.keys.with_key(keys::LABEL_METADATA_KEY, |k| {
            envelope::encrypt(b"duress-configured", k, b"duress-marker")
        })??;

        self.mutate_index(|index| {
            index.duress = Some(OpaqueConfig {
                encrypted_payload: marker,
            });
            Ok(())
        })
        .await
    }

    /// Stores an opaque, AEAD-encrypted second-factor configuration blob.
    /// Verification of the challenge itself is the out-of-scope TOTP
    /// collaborator's job (spec §1); the core only persists and, on request,
    /// decrypts the blob back to memory for that collaborator to interpret.
    pub async fn set_second_factor_config(&self, payload: &[u8]) -> Result<(), VaultError> {
        let encrypted = self.keys.with_key(keys::LABEL_METADATA_KEY, |k| {
            envelope::encrypt(payload, k, b"second-factor")
        })??;
        self.mutate_index(|index| {
            index.second_factor = Some(OpaqueConfig {
                encrypted_payload: encrypted,
            });
            Ok(())
        })
        .await
    }

    pub async fn decrypt_second_factor_config(&self) -> Result<Option<Vec<u8>>, VaultError> {
        let encrypted = {
            let guard = self.index.read().await;
            let index = guard.as_ref().ok_or(VaultError::Locked)?;
            match &index.second_factor {
                Some(cfg) => cfg.encrypted_payload.clone(),
                None => return Ok(None),
            }
        };
        let plaintext = self.keys.with_key(keys::LABEL_METADATA_KEY, |k| {
            envelope::decrypt(&encrypted, k, b"second-factor")
        })??;
        Ok(Some(plaintext))
    }

    // --- CRUD (spec §4.6, all require unlocked) ---

    pub async fn add_credential(
        &self,
        title: &str,
        fields: CredentialFields,
    ) -> Result<Entry, VaultError> {
        self.add_entry(title, EntryBody::Credential(fields)).await
    }

    pub async fn add_note(&self, title: &str, content: &str) -> Result<Entry, VaultError> {
        self.add_entry(
            title,
            EntryBody::Note {
                content: content.to_string(),
            },
        )
        .await
    }

    /// Reads `source_path`, computes its SHA-256 checksum, and stores the
    /// raw bytes as a separate encrypted blob outside the entry record
    /// (spec §3: File entries keep their body out of the record proper).
    pub async fn add_file(
        &self,
        title: &str,
        source_path: &std::path::Path,
        notes: Option<&str>,
    ) -> Result<Entry, VaultError> {
        let _ = notes; // file entries carry no free-text notes field per §3
        let bytes = tokio::fs::read(source_path).await?;
        let checksum = primitives::checksum8(&bytes);
        let original_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let mime_type = guess_mime(&original_name);

        let meta = FileMeta {
            original_name,
            mime_type,
            size: bytes.len() as u64,
            checksum_sha256: checksum,
        };

        let entry = self.add_entry(title, EntryBody::File(meta)).await?;

        let blob_ciphertext = self.keys.with_key(keys::LABEL_ENTRY_KEY, |k| {
            envelope::encrypt(&bytes, k, entry.id.as_bytes())
        })??;
        self.store.write_file_blob(entry.id, &blob_ciphertext).await?;

        Ok(entry)
    }

    async fn add_entry(&self, title: &str, body: EntryBody) -> Result<Entry, VaultError> {
        if !self.is_unlocked() {
            return Err(VaultError::Locked);
        }
        let id = primitives::uuid_v4();
        let now = primitives::now_millis();
        let entry = Entry {
            id,
            title: title.to_string(),
            created: now,
            modified: now,
            favorite: false,
            category: None,
            body,
        };
        entry.validate()?;

        self.write_entry_record(&entry).await?;

        let index_entry = IndexEntry {
            encrypted_title: self.encrypt_title(&entry.title, id)?,
            carriers: Vec::new(),
            fragments: Vec::new(),
            carrier_type: CarrierType::Png,
            kind: entry.body.kind(),
            created: entry.created,
            modified: entry.modified,
            favorite: entry.favorite,
            category: entry.category.clone(),
            file_meta: match &entry.body {
                EntryBody::File(meta) => Some(meta.clone()),
                _ => None,
            },
        };

        self.mutate_index(|index| {
            index.entries.insert(id, index_entry);
            index.meta.entry_count = index.entries.len();
            Ok(())
        })
        .await?;

        if self.decoy_ratio > 0 {
            // Best-effort camouflage: failure to write decoys never fails
            // the real mutation that already committed above.
            let _ = self.write_decoys(self.decoy_ratio as usize).await;
        }

        Ok(entry)
    }

    pub async fn get(&self, id: Uuid) -> Result<Entry, VaultError> {
        let index_entry = self.index_entry(id).await?;
        let title = self.decrypt_title(&index_entry.encrypted_title, id)?;
        let body = self.read_entry_body(id).await?;
        Ok(Entry {
            id,
            title,
            created: index_entry.created,
            modified: index_entry.modified,
            favorite: index_entry.favorite,
            category: index_entry.category,
            body,
        })
    }

    pub async fn get_note(&self, id: Uuid) -> Result<String, VaultError> {
        match self.read_entry_body(id).await? {
            EntryBody::Note { content } => Ok(content),
            _ => Err(VaultError::NotFound(id)),
        }
    }

    pub async fn get_file_meta(&self, id: Uuid) -> Result<FileMeta, VaultError> {
        match self.read_entry_body(id).await? {
            EntryBody::File(meta) => Ok(meta),
            _ => Err(VaultError::NotFound(id)),
        }
    }

    pub async fn get_file_bytes(&self, id: Uuid) -> Result<Vec<u8>, VaultError> {
        let _ = self.index_entry(id).await?;
        let ciphertext = self.store.read_file_blob(id).await?;
        let plaintext = self
            .keys
            .with_key(keys::LABEL_ENTRY_KEY, |k| envelope::decrypt(&ciphertext, k, id.as_bytes()))??;
        Ok(plaintext)
    }

    pub async fn list(&self) -> Result<Vec<IndexSummary>, VaultError> {
        let guard = self.index.read().await;
        let index = guard.as_ref().ok_or(VaultError::Locked)?;
        let mut out = Vec::with_capacity(index.entries.len());
        for (id, entry) in &index.entries {
            out.push(IndexSummary {
                id: *id,
                title: self.decrypt_title(&entry.encrypted_title, *id)?,
                kind: entry.kind,
                created: entry.created,
                modified: entry.modified,
                favorite: entry.favorite,
                category: entry.category.clone(),
            });
        }
        Ok(out)
    }

    /// Case-insensitive substring match over decrypted titles. O(n) per §4.6.
    pub async fn search(&self, query: &str) -> Result<Vec<IndexSummary>, VaultError> {
        let needle = query.to_lowercase();
        let all = self.list().await?;
        Ok(all
            .into_iter()
            .filter(|s| s.title.to_lowercase().contains(&needle))
            .collect())
    }

    /// File entries are immutable via this path — only credentials and
    /// notes may be patched (spec §4.6).
    pub async fn update(&self, id: Uuid, patch: EntryPatch) -> Result<Entry, VaultError> {
        let mut entry = self.get(id).await?;
        if matches!(entry.body, EntryBody::File(_)) {
            return Err(VaultError::Conflict);
        }

        if let Some(title) = &patch.title {
            entry.title = title.clone();
        }
        if let Some(favorite) = patch.favorite {
            entry.favorite = favorite;
        }
        if let Some(category) = &patch.category {
            entry.category = Some(category.clone());
        }

        match &mut entry.body {
            EntryBody::Credential(fields) => {
                if let Some(username) = &patch.username {
                    fields.username = Some(username.clone());
                }
                if let Some(password) = &patch.password {
                    fields.password = Some(password.clone());
                }
                if let Some(url) = &patch.url {
                    fields.url = Some(url.clone());
                }
                if let Some(notes) = &patch.notes {
                    fields.notes = Some(notes.clone());
                }
            }
            EntryBody::Note { content } => {
                if let Some(new_content) = &patch.content {
                    *content = new_content.clone();
                }
            }
            EntryBody::File(_) => unreachable!("rejected above"),
        }

        entry.modified = primitives::now_millis();
        entry.validate()?;

        self.write_entry_record(&entry).await?;
        let encrypted_title = self.encrypt_title(&entry.title, id)?;

        self.mutate_index(|index| {
            let index_entry = index.entries.get_mut(&id).ok_or(VaultError::NotFound(id))?;
            index_entry.encrypted_title = encrypted_title;
            index_entry.favorite = entry.favorite;
            index_entry.category = entry.category.clone();
            index_entry.modified = entry.modified;
            Ok(())
        })
        .await?;

        Ok(entry)
    }

    pub async fn toggle_favorite(&self, id: Uuid) -> Result<Entry, VaultError> {
        let new_state = {
            let guard = self.index.read().await;
            let index = guard.as_ref().ok_or(VaultError::Locked)?;
            let existing = index.entries.get(&id).ok_or(VaultError::NotFound(id))?;
            !existing.favorite
        };

        self.mutate_index(|index| {
            let index_entry = index.entries.get_mut(&id).ok_or(VaultError::NotFound(id))?;
            index_entry.favorite = new_state;
            index_entry.modified = primitives::now_millis();
            Ok(())
        })
        .await?;

        self.get(id).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), VaultError> {
        let index_entry = self.index_entry(id).await?;

        self.store.delete_record(id).await?;
        if index_entry.kind == EntryKind::File {
            self.store.delete_file_blob(id).await?;
        }
        for carrier in &index_entry.carriers {
            if let Some(local_path) = &carrier.local_path {
                let _ = self.store.delete_carrier(std::path::Path::new(local_path)).await;
            }
        }

        self.mutate_index(|index| {
            index.entries.remove(&id);
            index.meta.entry_count = index.entries.len();
            Ok(())
        })
        .await
    }

    pub async fn stats(&self) -> Result<VaultStats, VaultError> {
        let guard = self.index.read().await;
        let index = guard.as_ref().ok_or(VaultError::Locked)?;
        Ok(VaultStats {
            entry_count: index.meta.entry_count,
            created: index.meta.created,
            last_sync: index.meta.last_sync,
        })
    }

    // --- Carrier binding (cloud mode, spec §4.6) ---

    /// Pushes a record body out to the cloud collaborator: fragment the
    /// encrypted bytes, embed each fragment into a PNG carrier, upload it,
    /// and record the returned chunk handles on the Index Entry. Only
    /// reachable with a concrete `CloudCollaborator` — none ships in this
    /// crate (spec §1 draws the trust boundary at that interface).
    pub async fn push_to_cloud(
        &self,
        id: Uuid,
        collaborator: &dyn CloudCollaborator,
    ) -> Result<(), VaultError> {
        let ciphertext = self.store.read_record(id).await?;
        let raw = BASE64.decode(&ciphertext).map_err(|_| VaultError::Corrupt)?;
        let fragments = fragment::fragment(&raw)?;

        let mut handles = Vec::with_capacity(fragments.len());
        for frag in &fragments {
            let carrier = stego::generate_carrier(800, 600);
            let embedded = stego::embed(&carrier, &frag.to_bytes())?;
            let name = format!("{id}-{}.png", frag.index);
            let handle = collaborator.upload(&embedded.png_bytes, &name, "image/png")?;
            handles.push(FragmentHandle {
                index: frag.index,
                total: frag.total,
                cloud_handle: handle,
            });
        }

        self.mutate_index(|index| {
            let index_entry = index.entries.get_mut(&id).ok_or(VaultError::NotFound(id))?;
            index_entry.fragments = handles;
            index_entry.carrier_type = CarrierType::Png;
            Ok(())
        })
        .await
    }

    /// Reverses `push_to_cloud`: downloads every carrier, extracts its
    /// fragment, reassembles, and returns the original encrypted bytes.
    pub async fn pull_from_cloud(
        &self,
        id: Uuid,
        collaborator: &dyn CloudCollaborator,
    ) -> Result<Vec<u8>, VaultError> {
        let index_entry = self.index_entry(id).await?;
        let mut fragments = Vec::with_capacity(index_entry.fragments.len());
        for handle in &index_entry.fragments {
            let png_bytes = collaborator.download(&handle.cloud_handle)?;
            let payload = stego::extract(&png_bytes)?;
            fragments.push(fragment::Fragment::from_bytes(&payload)?);
        }
        Ok(fragment::reassemble(fragments)?)
    }

    /// Generates `count` visually-innocuous decoy carriers that embed no
    /// payload, purely to camouflage the real carrier population on disk
    /// (spec §2: "Decoy generation rides on the PNG codec").
    pub async fn write_decoys(&self, count: usize) -> Result<Vec<PathBuf>, VaultError> {
        let mut paths = Vec::with_capacity(count);
        for _ in 0..count {
            let png = stego::generate_carrier(800, 600);
            let id = primitives::uuid_v4();
            let path = self.store.write_carrier(id, 0, &png).await?;
            paths.push(path);
        }
        Ok(paths)
    }

    // --- Internal helpers ---

    fn encrypt_title(&self, title: &str, id: Uuid) -> Result<String, VaultError> {
        Ok(self
            .keys
            .with_key(keys::LABEL_METADATA_KEY, |k| envelope::encrypt(title.as_bytes(), k, id.as_bytes()))??)
    }

    fn decrypt_title(&self, encrypted_title: &str, id: Uuid) -> Result<String, VaultError> {
        let bytes = self
            .keys
            .with_key(keys::LABEL_METADATA_KEY, |k| envelope::decrypt(encrypted_title, k, id.as_bytes()))??;
        String::from_utf8(bytes).map_err(|_| VaultError::Corrupt)
    }

    async fn write_entry_record(&self, entry: &Entry) -> Result<(), VaultError> {
        let ciphertext = self.keys.with_key(keys::LABEL_ENTRY_KEY, |k| {
            envelope::encrypt_object(&entry.body, k, entry.id.as_bytes())
        })??;
        self.store.write_record(entry.id, &ciphertext).await
    }

    async fn read_entry_body(&self, id: Uuid) -> Result<EntryBody, VaultError> {
        let _ = self.index_entry(id).await?;
        let ciphertext = self.store.read_record(id).await?;
        let body: EntryBody = self.keys.with_key(keys::LABEL_ENTRY_KEY, |k| {
            envelope::decrypt_object(&ciphertext, k, id.as_bytes())
        })??;
        Ok(body)
    }

    async fn index_entry(&self, id: Uuid) -> Result<IndexEntry, VaultError> {
        let guard = self.index.read().await;
        let index = guard.as_ref().ok_or(VaultError::Locked)?;
        index.entries.get(&id).cloned().ok_or(VaultError::NotFound(id))
    }

    /// Loads the current index, runs `f` against it, persists the mutated
    /// index, and only then commits the in-memory copy — an index mutation
    /// either fully lands or the prior state remains authoritative (spec §5).
    async fn mutate_index<F>(&self, f: F) -> Result<(), VaultError>
    where
        F: FnOnce(&mut VaultIndex) -> Result<(), VaultError>,
    {
        let mut guard = self.index.write().await;
        let index = guard.as_mut().ok_or(VaultError::Locked)?;
        let mut candidate = index.clone();
        f(&mut candidate)?;
        debug_assert!(candidate.invariant_holds());

        self.persist_index(&candidate).await?;
        *index = candidate;
        Ok(())
    }

    async fn persist_index(&self, index: &VaultIndex) -> Result<(), VaultError> {
        let label = if self.is_duress() {
            // The decoy index still round-trips through the same AEAD
            // machinery; it is simply never written to the primary path.
            return self.persist_decoy_index(index).await;
        } else {
            keys::LABEL_INDEX_KEY
        };
        let ciphertext = self
            .keys
            .with_key(label, |k| envelope::encrypt_object(index, k, index.version.as_bytes()))??;
        self.store.write_index_atomic(&ciphertext).await
    }

    async fn persist_decoy_index(&self, index: &VaultIndex) -> Result<(), VaultError> {
        let ciphertext = self.keys.with_key(keys::LABEL_INDEX_KEY, |k| {
            envelope::encrypt_object(index, k, index.version.as_bytes())
        })??;
        self.store.write_decoy_index(&ciphertext).await
    }
}

fn guess_mime(filename: &str) -> String {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "json" => "application/json",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_vault(dir: &std::path::Path) -> Vault {
        Vault::new(dir, Duration::ZERO, 0)
    }

    #[tokio::test]
    async fn init_then_unlock_scenario_s1() {
        let dir = tempdir().unwrap();
        let vault = test_vault(dir.path());

        vault.init("correct horse battery staple").await.unwrap();
        vault.lock();

        vault.unlock("correct horse battery staple").await.unwrap();
        assert!(vault.is_unlocked());
        assert!(!vault.is_duress());

        vault.lock();
        let err = vault.unlock("wrong").await;
        assert!(matches!(err, Err(VaultError::Auth(AuthError::BadPassphrase))));

        vault.unlock("correct horse battery staple").await.unwrap();
        assert_eq!(vault.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn double_init_is_rejected() {
        let dir = tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault.init("pass").await.unwrap();
        assert!(matches!(
            vault.init("pass").await,
            Err(VaultError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn unlock_falls_back_to_backup_when_primary_is_tampered() {
        let dir = tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault.init("pass").await.unwrap();
        vault.add_note("Shopping list", "milk").await.unwrap();
        vault.lock();

        // A second mutation gives `index.bin.bak` a real (decryptable)
        // prior generation, then the primary is corrupted in place.
        vault.unlock("pass").await.unwrap();
        vault.add_note("Second note", "eggs").await.unwrap();
        vault.lock();

        let index_path = &vault.paths().index;
        let mut bytes = tokio::fs::read(index_path).await.unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        tokio::fs::write(index_path, &bytes).await.unwrap();

        vault.unlock("pass").await.unwrap();
        assert_eq!(vault.stats().await.unwrap().entry_count, 1);
    }

    #[tokio::test]
    async fn credential_crud_scenario_s2() {
        let dir = tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault.init("hunter2").await.unwrap();

        let entry = vault
            .add_credential(
                "GitHub",
                CredentialFields {
                    username: Some("alice".into()),
                    password: Some("p@ss".into()),
                    url: Some("https://github.com".into()),
                    notes: None,
                },
            )
            .await
            .unwrap();

        let fetched = vault.get(entry.id).await.unwrap();
        match &fetched.body {
            EntryBody::Credential(fields) => assert_eq!(fields.password.as_deref(), Some("p@ss")),
            _ => panic!("expected credential"),
        }

        let patch = EntryPatch {
            password: Some("new".into()),
            ..Default::default()
        };
        vault.update(entry.id, patch).await.unwrap();
        let updated = vault.get(entry.id).await.unwrap();
        match &updated.body {
            EntryBody::Credential(fields) => assert_eq!(fields.password.as_deref(), Some("new")),
            _ => panic!("expected credential"),
        }

        vault.delete(entry.id).await.unwrap();
        assert!(matches!(
            vault.get(entry.id).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn vault_idempotence_two_adds_increments_count_by_two() {
        let dir = tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault.init("pw").await.unwrap();

        let a = vault.add_note("Shopping list", "milk").await.unwrap();
        let b = vault.add_note("Shopping list", "milk").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(vault.stats().await.unwrap().entry_count, 2);
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let dir = tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault.init("pw").await.unwrap();
        vault.add_note("My Secret Note", "hi").await.unwrap();

        let hits = vault.search("secret").await.unwrap();
        assert_eq!(hits.len(), 1);
        let misses = vault.search("nope").await.unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn file_entries_are_immutable_via_update() {
        let dir = tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault.init("pw").await.unwrap();

        let source = dir.path().join("photo.txt");
        tokio::fs::write(&source, b"file bytes").await.unwrap();
        let entry = vault.add_file("Photo", &source, None).await.unwrap();

        let bytes = vault.get_file_bytes(entry.id).await.unwrap();
        assert_eq!(bytes, b"file bytes");

        let patch = EntryPatch {
            title: Some("renamed".into()),
            ..Default::default()
        };
        assert!(matches!(
            vault.update(entry.id, patch).await,
            Err(VaultError::Conflict)
        ));
    }

    #[tokio::test]
    async fn wrong_key_never_decodes_plaintext_scenario_s6() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let vault_a = test_vault(dir_a.path());
        let vault_b = test_vault(dir_b.path());
        vault_a.init("passphrase-a").await.unwrap();
        vault_b.init("passphrase-b").await.unwrap();

        let entry = vault_a.add_note("Secret", "contents").await.unwrap();
        let ciphertext = vault_a
            .store
            .read_record(entry.id)
            .await
            .unwrap();

        let wrong_key = vault_b
            .keys
            .with_key(keys::LABEL_ENTRY_KEY, |k| k.to_vec())
            .unwrap();
        let result = envelope::decrypt(&ciphertext, &wrong_key, entry.id.as_bytes());
        assert!(matches!(result, Err(CryptoError::Tampered)));
    }

    #[tokio::test]
    async fn duress_passphrase_unlocks_decoy_without_flipping_is_unlocked() {
        let dir = tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault.init("real-pass").await.unwrap();
        vault.add_note("Private", "shh").await.unwrap();

        vault.configure_duress("duress-pass").await.unwrap();
        vault.lock();

        vault.unlock("duress-pass").await.unwrap();
        assert!(vault.is_unlocked());
        assert!(vault.is_duress());
        assert_eq!(vault.stats().await.unwrap().entry_count, 0);

        vault.lock();
        vault.unlock("real-pass").await.unwrap();
        assert!(!vault.is_duress());
        assert_eq!(vault.stats().await.unwrap().entry_count, 1);
    }

    #[tokio::test]
    async fn second_factor_config_round_trips() {
        let dir = tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault.init("pw").await.unwrap();

        assert!(vault.decrypt_second_factor_config().await.unwrap().is_none());
        vault.set_second_factor_config(b"totp-seed").await.unwrap();
        let recovered = vault.decrypt_second_factor_config().await.unwrap().unwrap();
        assert_eq!(recovered, b"totp-seed");
    }
}
