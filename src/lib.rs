pub mod config;
pub mod diagnostics;
pub mod error;
pub mod transport;

pub mod ctap2;
pub mod keys;
pub mod store;
pub mod up;

pub use ctap2::{Authenticator, Dispatcher};
pub use up::UserPresenceProof;

use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const STORE_KEY_FILE: &str = "store.key";
const CREDENTIALS_DIR: &str = "credentials";
const KEYS_DIR: &str = "keys";

fn data_dir(cfg: &config::Config) -> error::Result<PathBuf> {
    if let Some(dir) = &cfg.data_dir {
        return Ok(dir.clone());
    }
    directories::ProjectDirs::from("", "", "virtauthn")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| error::Error::Internal("cannot determine XDG data dir".into()))
}

/// 32-byte at-rest key for credential records and private keys.
fn load_or_create_store_key(path: &Path) -> error::Result<[u8; 32]> {
    if path.exists() {
        let bytes = std::fs::read(path)?;
        return bytes
            .as_slice()
            .try_into()
            .map_err(|_| error::Error::Internal(format!("{} is not a 32-byte key", path.display())));
    }
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    store::disk::write_atomic(path, &key)?;
    Ok(key)
}

/// Open the key provider and credential store under `data_dir`.
pub fn open_store(data_dir: &Path) -> error::Result<store::CredentialStore> {
    std::fs::create_dir_all(data_dir)?;
    let aes_key = load_or_create_store_key(&data_dir.join(STORE_KEY_FILE))?;
    let provider = keys::SoftKeyProvider::open(aes_key, data_dir.join(KEYS_DIR))?;
    let store = store::CredentialStore::load(aes_key, data_dir.join(CREDENTIALS_DIR), Arc::new(provider))?;
    Ok(store)
}

pub async fn wipe(cfg: config::Config) -> anyhow::Result<()> {
    let data_dir = data_dir(&cfg)?;
    for sub in [CREDENTIALS_DIR, KEYS_DIR] {
        let dir = data_dir.join(sub);
        let mut count = 0usize;
        if dir.exists() {
            for entry in std::fs::read_dir(&dir)? {
                std::fs::remove_file(entry?.path())?;
                count += 1;
            }
        }
        println!("Deleted {count} file(s) from {}", dir.display());
    }
    let key_path = data_dir.join(STORE_KEY_FILE);
    if key_path.exists() {
        std::fs::remove_file(&key_path)?;
        println!("Deleted store key {}", key_path.display());
    }
    Ok(())
}

pub async fn run(cfg: config::Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    let level = match cfg.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .init();

    tracing::info!("Starting virtauthn");

    let data_dir = data_dir(&cfg)?;
    std::fs::create_dir_all(&data_dir)?;

    // Preflight checks
    diagnostics::check(&cfg, &data_dir)?;

    // Single-instance lock
    let lock_dir = std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.clone());
    let lock_path = lock_dir.join("virtauthn.lock");
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = lock.try_write()
        .map_err(|_| anyhow::anyhow!("virtauthn is already running (lock: {})", lock_path.display()))?;

    // Credential store
    let store_dir = data_dir.clone();
    let store = tokio::task::spawn_blocking(move || open_store(&store_dir))
        .await?
        .map_err(|e| anyhow::anyhow!("Failed to load credential store: {e}"))?;
    tracing::info!(count = store.credential_count(), "Credential store loaded");

    let state = up::AuthenticatorState::new();
    let timeout = Duration::from_secs(cfg.confirm_timeout_secs);
    let dispatcher = Arc::new(Dispatcher::new(Authenticator::new(
        config::AAGUID,
        Arc::new(Mutex::new(store)),
        state.clone(),
        timeout,
    )));

    tokio::spawn(up::run_confirmation_surface(state, cfg.pinentry.clone(), timeout));

    let listener = tokio::net::TcpListener::bind(cfg.listen).await?;
    transport::serve(listener, dispatcher)
        .await
        .map_err(error::Error::from)?;
    Ok(())
}
