use crate::error::{GmailError, Result};
use crate::gmail_api::{FileTokenStore, TokenStore};
use keyring::Entry;
use std::path::PathBuf;
use std::time::Duration;

pub const KEYRING_SERVICE_NAME: &str = "gmaildash-credentials";
pub const KEYRING_USERNAME: &str = "default_user";

pub const DEFAULT_CLIENT_SECRET_PATH: &str = "credentials.json";
pub const DEFAULT_TOKEN_PATH: &str = "token.json";
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 300;

/// Where the OAuth credential is persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialBackend {
    File(PathBuf),
    Keyring,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub client_secret_path: PathBuf,
    pub backend: CredentialBackend,
    pub api_base: String,
    pub auth_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_secret_path: PathBuf::from(DEFAULT_CLIENT_SECRET_PATH),
            backend: CredentialBackend::File(PathBuf::from(DEFAULT_TOKEN_PATH)),
            api_base: crate::gmail_api::GMAIL_API_BASE.to_string(),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
        }
    }
}

impl Config {
    pub fn token_store(&self) -> Result<Box<dyn TokenStore>> {
        match &self.backend {
            CredentialBackend::File(path) => Ok(Box::new(FileTokenStore::new(path.clone()))),
            CredentialBackend::Keyring => {
                let entry = Entry::new(KEYRING_SERVICE_NAME, KEYRING_USERNAME)
                    .map_err(|e| GmailError::Storage(e.to_string()))?;
                Ok(Box::new(entry))
            }
        }
    }
}
