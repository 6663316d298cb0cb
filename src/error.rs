use thiserror::Error;

/// Errors surfaced by provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Credential exchange with the backend failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A status or transport call happened before `initialize` succeeded.
    #[error("provider has not been initialized")]
    NotInitialized,

    /// The backend, or the authenticated account, lacks the capability.
    #[error("{0}")]
    Unsupported(String),

    /// Transient transport or API failure. The caller's next poll retries.
    #[error("backend unavailable: {0}")]
    Backend(String),

    /// Persisting credentials mid-flow failed.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Backend(err.to_string())
    }
}

/// Errors from the credential store.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}
