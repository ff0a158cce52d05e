//! File locations and configuration for the stealthtix CLI

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use stealth_tickets::store::backend::write_private;
use stealth_tickets::store::{EncryptedStore, FileStore, KdfParams, TicketStore};
use stealth_tickets::PurchaseConfig;

/// Default data directory under the home directory
const DATA_DIR: &str = ".stealth-tickets";
const CONFIG_FILE: &str = "config.json";
const PROFILE_FILE: &str = "profile.json";

/// Store namespace holding the encrypted stealth keys
pub const KEYS_NAMESPACE: &str = "keys";

/// Ticket store backed by encrypted files
pub type SecureTicketStore = TicketStore<EncryptedStore<FileStore>>;

/// Every path the CLI reads or writes, rooted at one directory
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.stealth-tickets`
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(Self::new(home.join(DATA_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Public half of the keys, readable without a password
    pub fn profile_file(&self) -> PathBuf {
        self.root.join(PROFILE_FILE)
    }

    pub fn file_store(&self) -> FileStore {
        FileStore::new(&self.root)
    }

    pub fn keys_file(&self) -> PathBuf {
        self.file_store().path_for(KEYS_NAMESPACE)
    }

    pub fn tickets_file(&self, config: &PurchaseConfig) -> PathBuf {
        self.file_store().path_for(&config.store_namespace)
    }
}

/// Load `config.json`, or defaults when there is none
pub fn load_config(paths: &Paths) -> Result<PurchaseConfig> {
    let path = paths.config_file();
    if !path.exists() {
        return Ok(PurchaseConfig::default());
    }
    Ok(PurchaseConfig::from_file(&path)?)
}

/// Write `config` to `config.json`
pub fn save_config(paths: &Paths, config: &PurchaseConfig, force: bool) -> Result<PathBuf> {
    let path = paths.config_file();
    if path.exists() && !force {
        bail!("Config already exists at {}. Use --force to overwrite.", path.display());
    }
    config.validate()?;
    fs::create_dir_all(paths.root()).context("Failed to create data directory")?;
    fs::write(&path, config.to_json()?).context("Failed to write config file")?;
    Ok(path)
}

/// Open the encrypted ticket store; a wrong password fails here
pub fn open_ticket_store(
    paths: &Paths,
    config: &PurchaseConfig,
    password: &str,
) -> Result<SecureTicketStore> {
    open_ticket_store_with_kdf(paths, config, password, KdfParams::default())
}

/// [`open_ticket_store`] with explicit Argon2 costs for a new store
pub fn open_ticket_store_with_kdf(
    paths: &Paths,
    config: &PurchaseConfig,
    password: &str,
    kdf: KdfParams,
) -> Result<SecureTicketStore> {
    config.validate()?;
    let namespace = config.store_namespace.as_str();
    if namespace == KEYS_NAMESPACE {
        bail!("store_namespace '{}' is reserved for the key file", KEYS_NAMESPACE);
    }
    let encrypted = EncryptedStore::open_with_params(paths.file_store(), namespace, password, kdf)
        .context("Failed to open ticket store")?;
    Ok(TicketStore::open(encrypted, namespace)?)
}

/// Write a file only the owner can read, creating the data directory
pub fn write_owner_only(paths: &Paths, path: &Path, contents: &[u8]) -> Result<()> {
    fs::create_dir_all(paths.root()).context("Failed to create data directory")?;
    write_private(path, contents)?;
    Ok(())
}
