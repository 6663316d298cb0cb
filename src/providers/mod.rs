use crate::error::ProviderError;
use crate::models::{InitStatus, NowPlaying};
use crate::settings::{MusicSettings, ScrobbleSession, SpotifyToken};

pub mod lastfm;
pub mod mpris;
pub mod spotify;

/// Credentials handed to [`MusicProvider::authenticate`]. Each backend
/// consumes the variant it understands and rejects the others.
#[derive(Debug, Clone)]
pub enum AuthRequest {
    /// Authorization-code flow with PKCE; only the application client id is
    /// needed, the rest happens in the browser.
    SpotifyPkce { client_id: String },
    /// Direct username/password exchange for a scrobble session.
    LastfmLogin {
        api_key: String,
        api_secret: String,
        username: String,
        password: String,
    },
}

/// Credential material returned by a successful authentication, ready to be
/// written into the settings record.
#[derive(Debug, Clone)]
pub enum AuthGrant {
    Spotify(SpotifyToken),
    Lastfm(ScrobbleSession),
}

/// Callback invoked whenever a provider's authenticator refreshes its token
/// behind the scenes. Registered by the session so refreshed tokens get
/// persisted without the provider knowing about storage.
pub type TokenListener = Box<dyn FnMut(&SpotifyToken) + Send>;

/// One adapter per music backend. All calls are blocking and must be
/// serialized by the caller; snapshots are read between `update_status`
/// calls, never concurrently with one.
pub trait MusicProvider {
    /// Run the backend's authentication flow, if it has one. Providers
    /// without an auth step return `Ok(None)` immediately.
    fn authenticate(&mut self, request: AuthRequest) -> Result<Option<AuthGrant>, ProviderError>;

    /// Check stored credentials and build the backend client. Returns
    /// `NotAuthorized` when credentials are missing or rejected.
    fn initialize(&mut self, settings: &MusicSettings) -> Result<InitStatus, ProviderError>;

    /// Resume the current media.
    fn play(&mut self) -> Result<(), ProviderError>;
    /// Pause the current media.
    fn pause(&mut self) -> Result<(), ProviderError>;
    /// Skip to the next item in the queue.
    fn skip(&mut self) -> Result<(), ProviderError>;
    /// Go back to the previously playing item.
    fn rewind(&mut self) -> Result<(), ProviderError>;

    /// Refresh the snapshot from the backend. "Nothing playing" is not an
    /// error, it is the empty snapshot. Use sparingly; API calls happen
    /// here and backends rate-limit.
    fn update_status(&mut self) -> Result<(), ProviderError>;

    /// The current snapshot, as of the last `update_status`.
    fn now_playing(&self) -> &NowPlaying;

    /// Register the token-refresh listener. Providers whose authenticator
    /// never refreshes anything drop it.
    fn set_token_listener(&mut self, _listener: TokenListener) {}

    /// Extended play-by-id capability, when the backend has one.
    fn track_launcher(&mut self) -> Option<&mut dyn LaunchTrack> {
        None
    }

    /// Tear down subscriptions or background resources held since
    /// `initialize`.
    fn shutdown(&mut self) {}
}

/// Starting playback of a specific track is not part of the common
/// contract; backends that can do it expose this through
/// [`MusicProvider::track_launcher`].
pub trait LaunchTrack {
    fn play_track(&mut self, uri: &str) -> Result<(), ProviderError>;
}
