use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::SettingsError;

// Refresh slightly before the backend would reject the token
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

/// OAuth token set for the streaming backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotifyToken {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime reported by the token endpoint, in seconds.
    pub expires_in: u64,
    /// Unix timestamp of when the token was obtained.
    pub obtained_at: u64,
}

impl SpotifyToken {
    pub fn new(access_token: String, refresh_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_in,
            obtained_at: unix_now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        let lifetime = self.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS);
        unix_now() >= self.obtained_at + lifetime
    }
}

/// Authenticated user session for the scrobbling backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrobbleSession {
    pub username: String,
    pub session_key: String,
    #[serde(default)]
    pub subscriber: bool,
}

/// The persisted credential record. Created empty on first run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsData {
    #[serde(default)]
    pub spotify_client_id: String,
    #[serde(default)]
    pub spotify_token: Option<SpotifyToken>,
    #[serde(default)]
    pub lastfm_api_key: String,
    #[serde(default)]
    pub lastfm_api_secret: String,
    #[serde(default)]
    pub lastfm_session: Option<ScrobbleSession>,
}

/// Shared handle to the credential store. This is the only mutable state
/// shared across the session, the providers and their token callbacks, so
/// the locking lives here. Writes go to disk immediately; the last writer
/// wins.
#[derive(Debug, Clone)]
pub struct MusicSettings {
    path: PathBuf,
    data: Arc<Mutex<SettingsData>>,
}

impl MusicSettings {
    /// Load the record at `path`. A missing file yields empty defaults; a
    /// file that exists but cannot be parsed is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            SettingsData::default()
        };

        Ok(Self {
            path,
            data: Arc::new(Mutex::new(data)),
        })
    }

    /// Read fields out of the record.
    pub fn read<R>(&self, f: impl FnOnce(&SettingsData) -> R) -> R {
        let data = self.data.lock().expect("settings mutex poisoned");
        f(&data)
    }

    /// Mutate the record and persist it before returning.
    pub fn update(&self, f: impl FnOnce(&mut SettingsData)) -> Result<(), SettingsError> {
        let mut data = self.data.lock().expect("settings mutex poisoned");
        f(&mut data);
        write_record(&self.path, &data)
    }

    /// Persist the record as-is.
    pub fn save(&self) -> Result<(), SettingsError> {
        let data = self.data.lock().expect("settings mutex poisoned");
        write_record(&self.path, &data)
    }

    /// Copy of the current record.
    pub fn snapshot(&self) -> SettingsData {
        self.read(|data| data.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_record(path: &Path, data: &SettingsData) -> Result<(), SettingsError> {
    let json = serde_json::to_string_pretty(data)?;
    fs::write(path, json)?;
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
