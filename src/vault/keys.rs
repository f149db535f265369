//! Key hierarchy: passphrase → master key (Argon2id) → labeled
//! subkeys (HKDF-SHA256), plus the in-memory key holder with auto-expiry and
//! zeroization.

use crate::vault::error::{AuthError, CryptoError};
use crate::vault::primitives;
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretBox};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Authoritative Argon2id parameters. Implementations must reject anything
/// weaker (lower memory/time cost); these are not merely defaults to be
/// lowered for convenience.
pub const ARGON2_TIME_COST: u32 = 3;
pub const ARGON2_MEMORY_COST_KIB: u32 = 64 * 1024;
pub const ARGON2_PARALLELISM: u32 = 4;
pub const ARGON2_OUTPUT_LEN: usize = 32;

pub const LABEL_INDEX_KEY: &str = "slasshy-index-key";
pub const LABEL_ENTRY_KEY: &str = "slasshy-entry-key";
pub const LABEL_METADATA_KEY: &str = "slasshy-metadata-key";

const DEFAULT_AUTO_LOCK: Duration = Duration::from_secs(5 * 60);

/// Derives the 32-byte master key from a passphrase and salt via Argon2id.
pub fn derive_master(passphrase: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_master_with_params(
        passphrase,
        salt,
        ARGON2_TIME_COST,
        ARGON2_MEMORY_COST_KIB,
        ARGON2_PARALLELISM,
    )
}

/// Same as [`derive_master`] but with explicit KDF parameters, used by the
/// config loader to validate (and reject weaker-than-default) overrides.
pub fn derive_master_with_params(
    passphrase: &str,
    salt: &[u8],
    time_cost: u32,
    memory_cost_kib: u32,
    parallelism: u32,
) -> Result<[u8; 32], CryptoError> {
    let params = Params::new(
        memory_cost_kib,
        time_cost,
        parallelism,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| CryptoError::KdfFail(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = [0u8; ARGON2_OUTPUT_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut out)
        .map_err(|e| CryptoError::KdfFail(e.to_string()))?;
    Ok(out)
}

/// Rejects KDF parameters weaker than the authoritative floor. Used by
/// config validation: out-of-range values are rejected at load.
pub fn validate_kdf_params(time_cost: u32, memory_cost_kib: u32, parallelism: u32) -> bool {
    time_cost >= ARGON2_TIME_COST
        && memory_cost_kib >= ARGON2_MEMORY_COST_KIB
        && parallelism >= ARGON2_PARALLELISM
}

/// Derives a labeled subkey from the master key via HKDF-SHA256 with an empty
/// salt (the master is already salted by Argon2) and `info = label`.
pub fn derive_subkey(master: &[u8], label: &str, len: usize) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(None, master);
    let mut okm = vec![0u8; len];
    // `len` is always 32 in practice; HKDF-SHA256 can produce up to 255*32
    // bytes, so this can only fail for absurd lengths we never pass.
    hk.expand(label.as_bytes(), &mut okm)
        .expect("hkdf expand length within RFC 5869 bounds");
    okm
}

/// `sha256(master)`, persisted alongside the vault index so `unlock` can
/// detect a wrong passphrase without ever decrypting anything (an oracle-free
/// check).
pub fn master_verifier(master: &[u8]) -> [u8; 32] {
    primitives::sha256(master)
}

/// The three subkeys derived at unlock, held only in memory.
struct KeySet {
    keys: HashMap<&'static str, SecretBox<[u8]>>,
}

/// In-memory holder for the unlocked key material. Starts an inactivity timer
/// on every access and zeroizes on expiry, explicit `lock()`, or drop.
pub struct KeyHolder {
    state: std::sync::Arc<RwLock<Option<KeySet>>>,
    last_access_millis: std::sync::Arc<AtomicU64>,
    auto_lock: Duration,
    monitor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl KeyHolder {
    /// `auto_lock = Duration::ZERO` disables auto-lock entirely.
    pub fn new(auto_lock: Duration) -> Self {
        Self {
            state: std::sync::Arc::new(RwLock::new(None)),
            last_access_millis: std::sync::Arc::new(AtomicU64::new(primitives::now_millis())),
            auto_lock,
            monitor: std::sync::Mutex::new(None),
        }
    }

    pub fn with_default_timeout() -> Self {
        Self::new(DEFAULT_AUTO_LOCK)
    }

    /// Populates the holder with the three labeled subkeys derived from
    /// `master` and starts the inactivity monitor (if auto-lock is enabled).
    pub fn unlock(&self, master: &[u8]) {
        let mut keys = HashMap::new();
        keys.insert(
            LABEL_INDEX_KEY,
            SecretBox::from(derive_subkey(master, LABEL_INDEX_KEY, 32)),
        );
        keys.insert(
            LABEL_ENTRY_KEY,
            SecretBox::from(derive_subkey(master, LABEL_ENTRY_KEY, 32)),
        );
        keys.insert(
            LABEL_METADATA_KEY,
            SecretBox::from(derive_subkey(master, LABEL_METADATA_KEY, 32)),
        );

        {
            let mut state = self.state.write().expect("key holder lock poisoned");
            *state = Some(KeySet { keys });
        }
        self.last_access_millis.store(primitives::now_millis(), Ordering::SeqCst);
        self.spawn_monitor();
    }

    fn spawn_monitor(&self) {
        if self.auto_lock.is_zero() {
            return;
        }
        let state = self.state.clone();
        let last_access = self.last_access_millis.clone();
        let timeout_ms = self.auto_lock.as_millis() as u64;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let elapsed = primitives::now_millis().saturating_sub(last_access.load(Ordering::SeqCst));
                if elapsed >= timeout_ms {
                    let mut guard = state.write().expect("key holder lock poisoned");
                    if guard.is_some() {
                        tracing::info!("auto-lock: key material zeroized after inactivity");
                    }
                    *guard = None;
                    break;
                }
            }
        });

        let mut slot = self.monitor.lock().expect("monitor mutex poisoned");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Borrows the labeled key and runs `f` against its raw bytes, resetting
    /// the inactivity timer on success. Returns `AuthError::Locked` if the
    /// holder has been zeroized (expired, explicitly locked, or never unlocked).
    pub fn with_key<F, R>(&self, label: &str, f: F) -> Result<R, AuthError>
    where
        F: FnOnce(&[u8]) -> R,
    {
        let guard = self.state.read().expect("key holder lock poisoned");
        let keys = guard.as_ref().ok_or(AuthError::Locked)?;
        let key = keys.keys.get(label).ok_or(AuthError::Locked)?;
        let result = f(key.expose_secret());
        drop(guard);
        self.last_access_millis.store(primitives::now_millis(), Ordering::SeqCst);
        Ok(result)
    }

    /// Zeroizes all key material immediately. Idempotent.
    pub fn lock(&self) {
        let mut guard = self.state.write().expect("key holder lock poisoned");
        *guard = None;
        drop(guard);
        if let Some(handle) = self.monitor.lock().expect("monitor mutex poisoned").take() {
            handle.abort();
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.state.read().expect("key holder lock poisoned").is_some()
    }
}

impl Drop for KeyHolder {
    fn drop(&mut self) {
        self.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_master_is_deterministic() {
        let salt = b"0123456789abcdef0123456789abcdef";
        let a = derive_master("correct horse battery staple", salt).unwrap();
        let b = derive_master("correct horse battery staple", salt).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn derive_master_differs_for_different_passphrases() {
        let salt = b"0123456789abcdef0123456789abcdef";
        let a = derive_master("correct horse battery staple", salt).unwrap();
        let b = derive_master("wrong horse battery staple", salt).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn validate_kdf_params_rejects_weaker_floor() {
        assert!(validate_kdf_params(3, 64 * 1024, 4));
        assert!(!validate_kdf_params(1, 64 * 1024, 4));
        assert!(!validate_kdf_params(3, 1024, 4));
    }

    #[tokio::test]
    async fn with_key_fails_after_lock() {
        let holder = KeyHolder::new(Duration::ZERO);
        holder.unlock(&[7u8; 32]);
        assert!(holder.is_unlocked());
        let got = holder.with_key(LABEL_INDEX_KEY, |k| k.to_vec()).unwrap();
        assert_eq!(got.len(), 32);

        holder.lock();
        assert!(!holder.is_unlocked());
        let err = holder.with_key(LABEL_INDEX_KEY, |k| k.to_vec());
        assert!(matches!(err, Err(AuthError::Locked)));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig { cases: 16, .. ProptestConfig::default() })]

        // Property 2 (§8): derive_master is deterministic for a given
        // (passphrase, salt), and differs across distinct passphrases with
        // overwhelming probability. Argon2id is deliberately slow, so this
        // runs far fewer cases than the other property suites.
        #[test]
        fn derive_master_deterministic_and_passphrase_sensitive(
            p1 in "[ -~]{1,32}",
            p2 in "[ -~]{1,32}",
            salt in proptest::collection::vec(any::<u8>(), 16..32),
        ) {
            prop_assume!(p1 != p2);
            let a = derive_master(&p1, &salt).unwrap();
            let b = derive_master(&p1, &salt).unwrap();
            prop_assert_eq!(a, b);

            let c = derive_master(&p2, &salt).unwrap();
            prop_assert_ne!(a, c);
        }
    }
}
