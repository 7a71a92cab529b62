//! MPD passwords in the OS keyring.
//!
//! Entries live under the service name `mcg`, keyed by `host:port`, so the
//! password never has to be written to `config.toml`.

use thiserror::Error;

const SERVICE_NAME: &str = "mcg";

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("no password stored for {key}")]
    NotFound { key: String },

    #[error("keyring access denied: {0}")]
    AccessDenied(String),

    #[error("keyring unavailable: {0}")]
    Unavailable(String),

    #[error("keyring error: {0}")]
    Other(String),
}

impl From<keyring::Error> for SecretsError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoEntry => SecretsError::NotFound {
                key: "unknown".into(),
            },
            keyring::Error::NoStorageAccess(e) => SecretsError::AccessDenied(e.to_string()),
            keyring::Error::PlatformFailure(e) => SecretsError::Unavailable(e.to_string()),
            other => SecretsError::Other(other.to_string()),
        }
    }
}

pub type SecretsResult<T> = Result<T, SecretsError>;

/// Keyring-backed password store.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    service: String,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.into(),
        }
    }

    fn build_key(host: &str, port: u16) -> String {
        format!("{host}:{port}")
    }

    fn entry(&self, key: &str) -> SecretsResult<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service, key)?)
    }

    pub fn store(&self, host: &str, port: u16, password: &str) -> SecretsResult<()> {
        let key = Self::build_key(host, port);
        self.entry(&key)?.set_password(password)?;
        tracing::debug!(host, port, "stored password in keyring");
        Ok(())
    }

    /// Returns `SecretsError::NotFound` if no password is stored.
    pub fn get(&self, host: &str, port: u16) -> SecretsResult<String> {
        let key = Self::build_key(host, port);
        match self.entry(&key)?.get_password() {
            Ok(secret) => Ok(secret),
            Err(keyring::Error::NoEntry) => Err(SecretsError::NotFound { key }),
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`get`](Self::get) but a missing entry is `Ok(None)`.
    pub fn lookup_password(&self, host: &str, port: u16) -> SecretsResult<Option<String>> {
        match self.get(host, port) {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretsError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Succeeds when nothing was stored.
    pub fn delete(&self, host: &str, port: u16) -> SecretsResult<()> {
        let key = Self::build_key(host, port);
        match self.entry(&key)?.delete_credential() {
            Ok(()) => {
                tracing::debug!(host, port, "deleted password from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
