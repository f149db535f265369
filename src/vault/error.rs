use thiserror::Error;

/// Failures from the key hierarchy: passphrase verification and key-holder access.
///
/// Never surface *which* variant fired to an untrusted peer — map all of these
/// to a single generic message at the API boundary (see `api.rs`).
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("incorrect passphrase")]
    BadPassphrase,

    #[error("vault is locked")]
    Locked,

    #[error("second factor required")]
    SecondFactorRequired,

    #[error("second factor invalid")]
    SecondFactorBad,
}

/// Failures from the AEAD envelope. A single `Tampered` variant covers every
/// authentication failure so callers can never distinguish "wrong key" from
/// "corrupted ciphertext" from "AAD mismatch" — decrypt-then-probe is not possible.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("authentication failed")]
    Tampered,

    #[error("key derivation failed: {0}")]
    KdfFail(String),

    #[error("random generation failed")]
    RngFail,
}

/// Failures from the PNG steganographic codec.
#[derive(Error, Debug)]
pub enum StegoError {
    #[error("carrier does not have enough capacity for this payload")]
    CarrierTooSmall,

    #[error("no embedded payload found")]
    NoPayload,

    #[error("embedded payload is truncated")]
    Truncated,

    #[error("embedded payload failed its checksum")]
    Corrupt,

    #[error("not a usable image carrier: {0}")]
    InvalidImage(String),
}

/// Failures from fragment splitting and reassembly.
#[derive(Error, Debug)]
pub enum FragmentError {
    #[error("payload would split into more than 100 fragments")]
    TooMany,

    #[error("fragment {0} is missing")]
    Missing(u16),

    #[error("fragment {0} was supplied more than once")]
    Duplicate(u16),

    #[error("fragment failed its checksum")]
    Corrupt,

    #[error("fragment buffer is truncated")]
    Truncated,
}

/// Top-level vault-index/record-store failures.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("vault has not been initialized")]
    NotInitialized,

    #[error("vault is already initialized")]
    AlreadyInitialized,

    #[error("vault is locked")]
    Locked,

    #[error("vault data is corrupt")]
    Corrupt,

    #[error("entry not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("conflicting concurrent mutation")]
    Conflict,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Stego(#[from] StegoError),

    #[error(transparent)]
    Fragment(#[from] FragmentError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl VaultError {
    /// Untrusted surfaces only ever see a generic string, never the variant
    /// or any wrapped detail. The full error is expected to have already
    /// been logged via `tracing` by the caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            VaultError::NotInitialized => "vault not initialized",
            VaultError::AlreadyInitialized => "vault already initialized",
            VaultError::Locked => "vault is locked",
            VaultError::Auth(_) => "authentication failed",
            VaultError::NotFound(_) => "not found",
            _ => "internal error",
        }
    }
}
