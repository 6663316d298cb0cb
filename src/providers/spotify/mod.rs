mod api;
mod auth;

use std::io;

use self::api::{CallError, CurrentlyPlaying, SpotifyApi};
use crate::browser;
use crate::error::ProviderError;
use crate::models::{InitStatus, NowPlaying, SongIcon};
use crate::providers::{AuthGrant, AuthRequest, LaunchTrack, MusicProvider, TokenListener};
use crate::settings::MusicSettings;

pub use self::auth::CALLBACK_PORT;

const NO_PREMIUM: &str = "playback control requires a Spotify Premium subscription";

type UrlOpener = Box<dyn Fn(&str) -> io::Result<()> + Send>;

/// Streaming-API provider. Authenticates with the PKCE authorization-code
/// flow over a loopback redirect and reads playback state from the Web API.
/// Transport commands are gated on the account's Premium tier.
pub struct SpotifyProvider {
    status: NowPlaying,
    api: Option<SpotifyApi>,
    has_premium: bool,
    /// Launch tracks by queueing then skipping forward instead of replacing
    /// the playback context.
    pub queue_then_skip: bool,
    open_url: UrlOpener,
    pending_listener: Option<TokenListener>,
    http: reqwest::blocking::Client,
}

impl SpotifyProvider {
    pub fn new() -> Self {
        Self {
            status: NowPlaying::default(),
            api: None,
            has_premium: false,
            queue_then_skip: false,
            open_url: Box::new(browser::open),
            pending_listener: None,
            http: reqwest::blocking::Client::new(),
        }
    }

    /// Replace the browser-open side effect used during authentication.
    pub fn with_url_opener(mut self, opener: impl Fn(&str) -> io::Result<()> + Send + 'static) -> Self {
        self.open_url = Box::new(opener);
        self
    }

    /// Whether the authenticated account can use transport commands.
    pub fn has_premium(&self) -> bool {
        self.has_premium
    }

    fn ready_api(&mut self) -> Result<&mut SpotifyApi, ProviderError> {
        let has_premium = self.has_premium;
        match self.api.as_mut() {
            None => Err(ProviderError::NotInitialized),
            Some(_) if !has_premium => Err(ProviderError::Unsupported(NO_PREMIUM.to_string())),
            Some(api) => Ok(api),
        }
    }

    /// Invalid-grant fallback: one explicit exchange with the refresh token
    /// from the store (not the copy the failed client was holding), then
    /// carry on with the new token.
    fn recover_with_refresh(
        &mut self,
        settings: &MusicSettings,
        client_id: String,
        listener: Option<TokenListener>,
    ) -> Result<InitStatus, ProviderError> {
        let Some(stored) = settings.read(|data| data.spotify_token.clone()) else {
            return Ok(InitStatus::NotAuthorized);
        };

        log::info!("spotify probe hit invalid_grant, attempting an explicit token refresh");
        let response = auth::refresh_token(&self.http, &client_id, &stored.refresh_token)
            .map_err(ProviderError::from)?;
        let token = response.into_token(Some(stored.refresh_token));
        settings.update(|data| data.spotify_token = Some(token.clone()))?;

        let mut api = SpotifyApi::new(client_id, token);
        if let Some(listener) = listener {
            api.set_token_listener(listener);
        }
        self.finish_initialize(api)
    }

    fn finish_initialize(&mut self, mut api: SpotifyApi) -> Result<InitStatus, ProviderError> {
        let user = api.me().map_err(ProviderError::from)?;
        self.has_premium = user
            .product
            .as_deref()
            .is_some_and(|product| product.contains("premium"));
        log::debug!("spotify account premium: {}", self.has_premium);
        self.api = Some(api);
        Ok(InitStatus::Success)
    }
}

impl Default for SpotifyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MusicProvider for SpotifyProvider {
    fn authenticate(&mut self, request: AuthRequest) -> Result<Option<AuthGrant>, ProviderError> {
        let AuthRequest::SpotifyPkce { client_id } = request else {
            return Err(ProviderError::Auth(
                "spotify authentication takes a client id".to_string(),
            ));
        };

        let pkce = auth::PkceChallenge::generate();
        let code_rx = auth::listen_for_code()?;

        let url = auth::build_auth_url(&client_id, &pkce.challenge);
        log::info!("opening the authorization page in the browser");
        (self.open_url)(&url).map_err(|err| {
            ProviderError::Auth(format!("could not open the authorization page: {err}"))
        })?;

        // Blocks until the redirect lands on the loopback listener. There is
        // no timeout here; callers that want one impose it externally.
        let code = code_rx.recv().map_err(|_| {
            ProviderError::Auth("authorization callback closed before a code arrived".to_string())
        })?;

        let response = auth::exchange_code(&self.http, &client_id, &code, &pkce.verifier)
            .map_err(ProviderError::from)?;
        Ok(Some(AuthGrant::Spotify(response.into_token(None))))
    }

    fn initialize(&mut self, settings: &MusicSettings) -> Result<InitStatus, ProviderError> {
        let (client_id, token) =
            settings.read(|data| (data.spotify_client_id.clone(), data.spotify_token.clone()));
        let Some(token) = token else {
            return Ok(InitStatus::NotAuthorized);
        };

        let mut api = SpotifyApi::new(client_id.clone(), token);
        if let Some(listener) = self.pending_listener.take() {
            api.set_token_listener(listener);
        }

        // Probe call to force token validation before reporting success
        match api.currently_playing() {
            Ok(_) => {}
            Err(CallError::Unauthorized) => {
                log::info!("stored spotify token was rejected, clearing it");
                settings.update(|data| data.spotify_token = None)?;
                return Ok(InitStatus::NotAuthorized);
            }
            Err(CallError::InvalidGrant) => {
                let listener = api.take_token_listener();
                return self.recover_with_refresh(settings, client_id, listener);
            }
            Err(err) => return Err(err.into()),
        }

        self.finish_initialize(api)
    }

    fn play(&mut self) -> Result<(), ProviderError> {
        self.ready_api()?.resume().map_err(ProviderError::from)
    }

    fn pause(&mut self) -> Result<(), ProviderError> {
        self.ready_api()?
            .pause_playback()
            .map_err(ProviderError::from)
    }

    fn skip(&mut self) -> Result<(), ProviderError> {
        self.ready_api()?.next_track().map_err(ProviderError::from)
    }

    fn rewind(&mut self) -> Result<(), ProviderError> {
        self.ready_api()?
            .previous_track()
            .map_err(ProviderError::from)
    }

    fn update_status(&mut self) -> Result<(), ProviderError> {
        let api = self.api.as_mut().ok_or(ProviderError::NotInitialized)?;
        let current = api.currently_playing().map_err(ProviderError::from)?;
        self.status = snapshot_from(current);
        Ok(())
    }

    fn now_playing(&self) -> &NowPlaying {
        &self.status
    }

    fn set_token_listener(&mut self, listener: TokenListener) {
        match self.api.as_mut() {
            Some(api) => api.set_token_listener(listener),
            None => self.pending_listener = Some(listener),
        }
    }

    fn track_launcher(&mut self) -> Option<&mut dyn LaunchTrack> {
        Some(self)
    }
}

impl LaunchTrack for SpotifyProvider {
    fn play_track(&mut self, uri: &str) -> Result<(), ProviderError> {
        let queue_then_skip = self.queue_then_skip;
        let api = self.ready_api()?;
        if queue_then_skip {
            api.queue_track(uri).map_err(ProviderError::from)?;
            api.next_track().map_err(ProviderError::from)?;
        } else {
            api.play_uri(uri).map_err(ProviderError::from)?;
        }
        Ok(())
    }
}

fn snapshot_from(current: Option<CurrentlyPlaying>) -> NowPlaying {
    let Some(current) = current else {
        return NowPlaying::default();
    };
    if !current.is_playing {
        return NowPlaying::default();
    }
    // Ads and some podcast content carry no track item
    let Some(item) = current.item else {
        return NowPlaying::default();
    };

    NowPlaying {
        playing: true,
        title: item.name,
        artists: item.artists.into_iter().map(|artist| artist.name).collect(),
        icons: item
            .album
            .map(|album| {
                album
                    .images
                    .into_iter()
                    .map(|image| SongIcon {
                        width: image.width,
                        height: image.height,
                        url: Some(image.url),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        position_ms: current.progress_ms,
        length_ms: item.duration_ms,
        track_id: item.id.unwrap_or_default(),
        track_url: item.uri,
    }
}
