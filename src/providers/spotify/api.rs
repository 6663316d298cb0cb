use serde::Deserialize;

use super::auth;
use crate::error::ProviderError;
use crate::providers::TokenListener;
use crate::settings::SpotifyToken;

const API_BASE_URL: &str = "https://api.spotify.com/v1";

/// Outcome of a single Spotify call, kept separate from [`ProviderError`]
/// because `initialize` branches on the unauthorized / invalid-grant split.
#[derive(Debug)]
pub(crate) enum CallError {
    /// The API rejected the access token outright (401).
    Unauthorized,
    /// The token endpoint rejected the refresh token.
    InvalidGrant,
    Api(u16, String),
    Transport(reqwest::Error),
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        CallError::Transport(err)
    }
}

impl From<CallError> for ProviderError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Unauthorized => ProviderError::Auth("access token rejected".to_string()),
            CallError::InvalidGrant => {
                ProviderError::Auth("refresh token rejected (invalid_grant)".to_string())
            }
            CallError::Api(status, body) => {
                ProviderError::Backend(format!("spotify api returned {status}: {body}"))
            }
            CallError::Transport(err) => ProviderError::Backend(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CurrentlyPlaying {
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub progress_ms: Option<u64>,
    /// Null for ads and some podcast content even while playing.
    #[serde(default)]
    pub item: Option<TrackItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrackItem {
    /// Null for local files.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub artists: Vec<TrackArtist>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrackArtist {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AlbumRef {
    #[serde(default)]
    pub images: Vec<AlbumImage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AlbumImage {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PrivateUser {
    /// Subscription tier, e.g. "premium" or "open".
    #[serde(default)]
    pub product: Option<String>,
}

/// Authenticated client for the Spotify Web API. Holds the current token
/// and refreshes it before calls once it nears expiry; every refresh is
/// surfaced through the registered token listener.
pub(crate) struct SpotifyApi {
    client: reqwest::blocking::Client,
    client_id: String,
    token: SpotifyToken,
    listener: Option<TokenListener>,
}

impl SpotifyApi {
    pub fn new(client_id: String, token: SpotifyToken) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            client_id,
            token,
            listener: None,
        }
    }

    pub fn set_token_listener(&mut self, listener: TokenListener) {
        self.listener = Some(listener);
    }

    pub fn take_token_listener(&mut self) -> Option<TokenListener> {
        self.listener.take()
    }

    fn ensure_fresh_token(&mut self) -> Result<(), CallError> {
        if !self.token.is_expired() {
            return Ok(());
        }
        log::debug!("spotify access token expired, refreshing");
        let response =
            auth::refresh_token(&self.client, &self.client_id, &self.token.refresh_token)?;
        self.token = response.into_token(Some(self.token.refresh_token.clone()));
        if let Some(listener) = self.listener.as_mut() {
            listener(&self.token);
        }
        Ok(())
    }

    /// The player endpoint returns 204 with no body when nothing is active.
    pub fn currently_playing(&mut self) -> Result<Option<CurrentlyPlaying>, CallError> {
        self.ensure_fresh_token()?;
        let response = self
            .client
            .get(format!("{API_BASE_URL}/me/player/currently-playing"))
            .bearer_auth(&self.token.access_token)
            .send()?;

        match response.status().as_u16() {
            200 => Ok(Some(response.json()?)),
            204 => Ok(None),
            401 => Err(CallError::Unauthorized),
            status => Err(CallError::Api(status, response.text().unwrap_or_default())),
        }
    }

    pub fn me(&mut self) -> Result<PrivateUser, CallError> {
        self.ensure_fresh_token()?;
        let response = self
            .client
            .get(format!("{API_BASE_URL}/me"))
            .bearer_auth(&self.token.access_token)
            .send()?;

        match response.status().as_u16() {
            200 => Ok(response.json()?),
            401 => Err(CallError::Unauthorized),
            status => Err(CallError::Api(status, response.text().unwrap_or_default())),
        }
    }

    pub fn resume(&mut self) -> Result<(), CallError> {
        self.command(reqwest::Method::PUT, "/me/player/play", None)
    }

    pub fn pause_playback(&mut self) -> Result<(), CallError> {
        self.command(reqwest::Method::PUT, "/me/player/pause", None)
    }

    pub fn next_track(&mut self) -> Result<(), CallError> {
        self.command(reqwest::Method::POST, "/me/player/next", None)
    }

    pub fn previous_track(&mut self) -> Result<(), CallError> {
        self.command(reqwest::Method::POST, "/me/player/previous", None)
    }

    pub fn queue_track(&mut self, uri: &str) -> Result<(), CallError> {
        let path = format!("/me/player/queue?uri={}", urlencoding::encode(uri));
        self.command(reqwest::Method::POST, &path, None)
    }

    pub fn play_uri(&mut self, uri: &str) -> Result<(), CallError> {
        let body = serde_json::json!({ "uris": [uri] });
        self.command(reqwest::Method::PUT, "/me/player/play", Some(body))
    }

    /// Fire-and-forget player command. Spotify answers these with 200, 202
    /// or 204 depending on the endpoint.
    fn command(
        &mut self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(), CallError> {
        self.ensure_fresh_token()?;
        let request = self
            .client
            .request(method, format!("{API_BASE_URL}{path}"))
            .bearer_auth(&self.token.access_token);
        // Spotify insists on an explicit zero length for empty bodies
        let request = match body {
            Some(body) => request.json(&body),
            None => request.header(reqwest::header::CONTENT_LENGTH, 0),
        };
        let response = request.send()?;

        match response.status().as_u16() {
            200 | 202 | 204 => Ok(()),
            401 => Err(CallError::Unauthorized),
            status => Err(CallError::Api(status, response.text().unwrap_or_default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_currently_playing() {
        let payload = json!({
            "is_playing": true,
            "progress_ms": 61_234,
            "item": {
                "id": "67Hna13dNDkZvBpTXRIaOJ",
                "name": "Teardrop",
                "uri": "spotify:track:67Hna13dNDkZvBpTXRIaOJ",
                "duration_ms": 330_226,
                "artists": [{"name": "Massive Attack"}],
                "album": {
                    "images": [
                        {"url": "https://i.scdn.co/image/large", "width": 640, "height": 640},
                        {"url": "https://i.scdn.co/image/small", "width": 64, "height": 64}
                    ]
                }
            }
        });

        let current: CurrentlyPlaying = serde_json::from_value(payload).unwrap();
        assert!(current.is_playing);
        assert_eq!(current.progress_ms, Some(61_234));

        let item = current.item.unwrap();
        assert_eq!(item.name, "Teardrop");
        assert_eq!(item.duration_ms, Some(330_226));
        assert_eq!(item.artists.len(), 1);
        assert_eq!(item.album.unwrap().images.len(), 2);
    }

    #[test]
    fn test_parse_currently_playing_without_item() {
        // Ad break: playing but no track item
        let payload = json!({ "is_playing": true, "progress_ms": 1000, "item": null });
        let current: CurrentlyPlaying = serde_json::from_value(payload).unwrap();
        assert!(current.is_playing);
        assert!(current.item.is_none());
    }

    #[test]
    fn test_parse_private_user() {
        let user: PrivateUser = serde_json::from_value(json!({"product": "premium"})).unwrap();
        assert_eq!(user.product.as_deref(), Some("premium"));

        let user: PrivateUser = serde_json::from_value(json!({})).unwrap();
        assert!(user.product.is_none());
    }
}
