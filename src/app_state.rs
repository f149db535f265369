use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::vault::Vault;

/// `Vault` is already cheap to clone (every field is reference-counted), so
/// `AppState` just holds one behind an `Arc` for axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<Vault>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let vault = Vault::new(
            config.vault_dir.clone(),
            Duration::from_millis(config.auto_lock_timeout_ms),
            config.decoy_ratio,
        );
        AppState {
            vault: Arc::new(vault),
        }
    }
}
