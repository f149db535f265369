//! Data model: plaintext entries, their encrypted-at-rest index
//! counterparts, and the single durable Vault Index root.

use super::error::VaultError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub const TITLE_MAX: usize = 256;
pub const USERNAME_MAX: usize = 256;
pub const PASSWORD_MAX: usize = 4096;
pub const URL_MAX: usize = 2048;
pub const CREDENTIAL_NOTES_MAX: usize = 65_536;
pub const NOTE_CONTENT_MAX: usize = 1024 * 1024;
pub const CATEGORY_MAX: usize = 64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Credential,
    Note,
    File,
}

/// Only `Png` is implemented. `Jpg` is carried as a recognized value so the
/// on-disk format doesn't need to change when it's added, but nothing in
/// this crate produces it yet.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CarrierType {
    Png,
    Jpg,
    Decoy,
}

/// Names either a local carrier file or a cloud chunk handle. Exactly one of
/// the two should be set; which one is a deployment-mode decision made by the
/// (out-of-scope) cloud collaborator, not by this type.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CarrierDescriptor {
    pub carrier_type: CarrierType,
    pub local_path: Option<String>,
    pub cloud_handle: Option<String>,
}

/// One fragment's cloud location, recorded once a record body has been
/// pushed out to the (unimplemented) cloud collaborator. See
/// `CloudCollaborator` in `store.rs`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FragmentHandle {
    pub index: u16,
    pub total: u16,
    pub cloud_handle: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CredentialFields {
    pub username: Option<String>,
    pub password: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FileMeta {
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub checksum_sha256: String,
}

/// The plaintext body specific to each entry kind. Never serialized to disk
/// on its own — always inside an `Entry`, which is only ever handled inside
/// an AEAD envelope.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryBody {
    Credential(CredentialFields),
    Note { content: String },
    File(FileMeta),
}

impl EntryBody {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryBody::Credential(_) => EntryKind::Credential,
            EntryBody::Note { .. } => EntryKind::Note,
            EntryBody::File(_) => EntryKind::File,
        }
    }
}

/// A fully decrypted record, held only in memory.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Entry {
    pub id: Uuid,
    pub title: String,
    pub created: u64,
    pub modified: u64,
    pub favorite: bool,
    pub category: Option<String>,
    pub body: EntryBody,
}

impl Entry {
    pub fn validate(&self) -> Result<(), VaultError> {
        validate_title(&self.title)?;
        if let Some(category) = &self.category {
            validate_category(category)?;
        }
        if self.modified < self.created {
            return Err(VaultError::Corrupt);
        }
        match &self.body {
            EntryBody::Credential(fields) => validate_credential_fields(fields)?,
            EntryBody::Note { content } => validate_note_content(content)?,
            EntryBody::File(_) => {}
        }
        Ok(())
    }
}

pub fn validate_title(title: &str) -> Result<(), VaultError> {
    if title.is_empty() || title.chars().count() > TITLE_MAX {
        return Err(VaultError::Corrupt);
    }
    Ok(())
}

pub fn validate_category(category: &str) -> Result<(), VaultError> {
    if category.chars().count() > CATEGORY_MAX {
        return Err(VaultError::Corrupt);
    }
    Ok(())
}

pub fn validate_credential_fields(fields: &CredentialFields) -> Result<(), VaultError> {
    if let Some(username) = &fields.username {
        if username.chars().count() > USERNAME_MAX {
            return Err(VaultError::Corrupt);
        }
    }
    if let Some(password) = &fields.password {
        if password.chars().count() > PASSWORD_MAX {
            return Err(VaultError::Corrupt);
        }
    }
    if let Some(url) = &fields.url {
        if url.chars().count() > URL_MAX || !is_well_formed_url(url) {
            return Err(VaultError::Corrupt);
        }
    }
    if let Some(notes) = &fields.notes {
        if notes.chars().count() > CREDENTIAL_NOTES_MAX {
            return Err(VaultError::Corrupt);
        }
    }
    Ok(())
}

pub fn validate_note_content(content: &str) -> Result<(), VaultError> {
    if content.len() > NOTE_CONTENT_MAX {
        return Err(VaultError::Corrupt);
    }
    Ok(())
}

/// A minimal well-formedness check: a recognized scheme followed by `://`
/// and a non-empty remainder. Not a full RFC 3986 parser — the core doesn't
/// depend on a URL crate for this single field.
fn is_well_formed_url(url: &str) -> bool {
    for scheme in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            return !rest.is_empty();
        }
    }
    false
}

/// Patch applied by `update()`. Every field is optional; only credentials and
/// notes may be patched (file entries are immutable — replace via delete+add).
#[derive(Deserialize, Debug, Clone, Default)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub favorite: Option<bool>,
    pub category: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub content: Option<String>,
}

/// Encrypted-at-rest counterpart of an `Entry`, living inside the Vault Index.
/// `encrypted_title` is itself an AEAD envelope (metadata key, `aad = id`),
/// nested inside the index's own outer envelope.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexEntry {
    pub encrypted_title: String,
    pub carriers: Vec<CarrierDescriptor>,
    pub fragments: Vec<FragmentHandle>,
    pub carrier_type: CarrierType,
    pub kind: EntryKind,
    pub created: u64,
    pub modified: u64,
    pub favorite: bool,
    pub category: Option<String>,
    pub file_meta: Option<FileMeta>,
}

/// Summary row returned by `list()` — titles already decrypted in memory,
/// never persisted in this shape.
#[derive(Serialize, Debug, Clone)]
pub struct IndexSummary {
    pub id: Uuid,
    pub title: String,
    pub kind: EntryKind,
    pub created: u64,
    pub modified: u64,
    pub favorite: bool,
    pub category: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VaultIndexMeta {
    pub created: u64,
    pub last_sync: Option<u64>,
    pub entry_count: usize,
}

/// Encrypted blob opaque to this crate — second-factor and duress
/// configuration are consumed by out-of-scope collaborators (TOTP helpers,
/// the terminal shell), but the Vault Index still owns persisting them.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OpaqueConfig {
    pub encrypted_payload: String,
}

/// The single durable root-of-trust file (`index.bin`, decrypted form).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VaultIndex {
    pub version: String,
    pub salt: String,
    pub key_verifier: String,
    pub entries: HashMap<Uuid, IndexEntry>,
    pub meta: VaultIndexMeta,
    pub second_factor: Option<OpaqueConfig>,
    pub duress: Option<OpaqueConfig>,
}

impl VaultIndex {
    pub fn new(version: &str, salt: &str, key_verifier: &str, now: u64) -> Self {
        VaultIndex {
            version: version.to_string(),
            salt: salt.to_string(),
            key_verifier: key_verifier.to_string(),
            entries: HashMap::new(),
            meta: VaultIndexMeta {
                created: now,
                last_sync: None,
                entry_count: 0,
            },
            second_factor: None,
            duress: None,
        }
    }

    /// Invariant: `entryCount` always equals the live entry map size.
    pub fn invariant_holds(&self) -> bool {
        self.meta.entry_count == self.entries.len()
    }
}

/// Returned by `Vault::stats()`.
#[derive(Serialize, Debug, Clone)]
pub struct VaultStats {
    pub entry_count: usize,
    pub created: u64,
    pub last_sync: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_bounds_are_enforced() {
        assert!(validate_title("GitHub").is_ok());
        assert!(validate_title("").is_err());
        assert!(validate_title(&"x".repeat(257)).is_err());
        assert!(validate_title(&"x".repeat(256)).is_ok());
    }

    #[test]
    fn url_must_be_well_formed() {
        let mut fields = CredentialFields::default();
        fields.url = Some("https://github.com".into());
        assert!(validate_credential_fields(&fields).is_ok());

        fields.url = Some("not-a-url".into());
        assert!(validate_credential_fields(&fields).is_err());
    }

    #[test]
    fn new_index_satisfies_entry_count_invariant() {
        let index = VaultIndex::new("1", "c2FsdA==", "deadbeef", 0);
        assert!(index.invariant_holds());
    }

    #[test]
    fn modified_before_created_is_rejected() {
        let entry = Entry {
            id: Uuid::new_v4(),
            title: "Note".into(),
            created: 100,
            modified: 50,
            favorite: false,
            category: None,
            body: EntryBody::Note {
                content: "hi".into(),
            },
        };
        assert!(entry.validate().is_err());
    }
}
