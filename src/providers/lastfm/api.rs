use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::ProviderError;
use crate::settings::ScrobbleSession;

const API_ROOT: &str = "https://ws.audioscrobbler.com/2.0/";

// Last.fm API error codes
const ERROR_BAD_CREDENTIALS: u32 = 4;
const ERROR_INVALID_SESSION: u32 = 9;

/// Outcome of a single Last.fm call. `initialize` branches on the
/// invalid-session case to clear stored credentials.
#[derive(Debug)]
pub(crate) enum CallError {
    /// Error 9: the session key is invalid or has expired.
    InvalidSession,
    /// Error 4: username or password rejected.
    BadCredentials(String),
    Api(String),
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
            CallError::InvalidSession => {
                ProviderError::Auth("session key rejected".to_string())
            }
            CallError::BadCredentials(message) => ProviderError::Auth(message),
            CallError::Api(message) => ProviderError::Backend(message),
            CallError::Transport(err) => ProviderError::Backend(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiFailure {
    error: u32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session: SessionPayload,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    name: String,
    key: String,
    #[serde(default)]
    subscriber: u8,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecentTracksResponse {
    pub recenttracks: RecentTracks,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RecentTracks {
    #[serde(default)]
    pub track: Vec<RecentTrack>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecentTrack {
    pub name: String,
    pub artist: TextField,
    #[serde(default)]
    pub image: Vec<SizedImage>,
    #[serde(default)]
    pub mbid: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "@attr", default)]
    pub attr: Option<NowPlayingAttr>,
}

impl RecentTrack {
    /// The scrobble feed marks the in-progress track with a nowplaying
    /// attribute; finished scrobbles carry a timestamp instead.
    pub fn is_now_playing(&self) -> bool {
        self.attr
            .as_ref()
            .map(|attr| attr.nowplaying == "true")
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextField {
    #[serde(rename = "#text", default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SizedImage {
    #[serde(rename = "#text", default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NowPlayingAttr {
    #[serde(default)]
    pub nowplaying: String,
}

/// Client for the Last.fm web service. Write-style methods are signed with
/// the application secret; read methods only need the api key.
pub(crate) struct LastfmApi {
    client: reqwest::blocking::Client,
    api_key: String,
    api_secret: String,
    session_key: Option<String>,
}

impl LastfmApi {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            api_key,
            api_secret,
            session_key: None,
        }
    }

    pub fn with_session(mut self, session_key: String) -> Self {
        self.session_key = Some(session_key);
        self
    }

    /// Exchange username and password for a long-lived session key.
    pub fn get_mobile_session(
        &self,
        username: &str,
        password: &str,
    ) -> Result<ScrobbleSession, CallError> {
        let mut params = BTreeMap::new();
        params.insert("method", "auth.getMobileSession".to_string());
        params.insert("api_key", self.api_key.clone());
        params.insert("username", username.to_string());
        params.insert("password", password.to_string());

        let payload: SessionResponse = self.post_signed(params)?;
        Ok(ScrobbleSession {
            username: payload.session.name,
            session_key: payload.session.key,
            subscriber: payload.session.subscriber != 0,
        })
    }

    /// Cheap authenticated probe; fails with `InvalidSession` when the
    /// stored key has been revoked.
    pub fn validate_session(&self) -> Result<(), CallError> {
        let Some(session_key) = self.session_key.clone() else {
            return Err(CallError::InvalidSession);
        };

        let mut params = BTreeMap::new();
        params.insert("method", "user.getInfo".to_string());
        params.insert("api_key", self.api_key.clone());
        params.insert("sk", session_key);

        let _: serde_json::Value = self.post_signed(params)?;
        Ok(())
    }

    /// The user's single most recent scrobble.
    pub fn recent_tracks(&self, user: &str) -> Result<RecentTracks, CallError> {
        let response = self
            .client
            .get(API_ROOT)
            .query(&[
                ("method", "user.getrecenttracks"),
                ("user", user),
                ("api_key", self.api_key.as_str()),
                ("limit", "1"),
                ("format", "json"),
            ])
            .send()?;

        let payload: RecentTracksResponse = parse_payload(response)?;
        Ok(payload.recenttracks)
    }

    /// Track length in milliseconds, when the catalogue knows it.
    pub fn track_info(&self, artist: &str, track: &str) -> Result<Option<u64>, CallError> {
        let response = self
            .client
            .get(API_ROOT)
            .query(&[
                ("method", "track.getinfo"),
                ("artist", artist),
                ("track", track),
                ("api_key", self.api_key.as_str()),
                ("format", "json"),
            ])
            .send()?;

        let payload: serde_json::Value = parse_payload(response)?;
        Ok(duration_ms(&payload["track"]["duration"]))
    }

    fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        params: BTreeMap<&'static str, String>,
    ) -> Result<T, CallError> {
        let api_sig = signature(&params, &self.api_secret);

        let mut form: Vec<(&str, String)> = params.into_iter().collect();
        form.push(("api_sig", api_sig));
        // format is not part of the signature base
        form.push(("format", "json".to_string()));

        let response = self.client.post(API_ROOT).form(&form).send()?;
        parse_payload(response)
    }
}

/// api_sig per the Last.fm protocol: md5 over the parameters concatenated
/// as namevalue in alphabetical name order, with the secret appended.
fn signature(params: &BTreeMap<&'static str, String>, secret: &str) -> String {
    let mut base = String::new();
    for (name, value) in params {
        base.push_str(name);
        base.push_str(value);
    }
    base.push_str(secret);
    format!("{:x}", md5::compute(base.as_bytes()))
}

/// Last.fm wraps errors in a 200/403 body with `error` and `message`
/// fields; anything without that shape is the real payload.
fn parse_payload<T: serde::de::DeserializeOwned>(
    response: reqwest::blocking::Response,
) -> Result<T, CallError> {
    let status = response.status().as_u16();
    let text = response.text()?;

    if let Ok(failure) = serde_json::from_str::<ApiFailure>(&text) {
        return Err(classify(failure));
    }

    if !(200..300).contains(&status) {
        return Err(CallError::Api(format!("last.fm returned HTTP {status}")));
    }

    serde_json::from_str(&text)
        .map_err(|err| CallError::Api(format!("unexpected last.fm payload: {err}")))
}

fn classify(failure: ApiFailure) -> CallError {
    match failure.error {
        ERROR_INVALID_SESSION => CallError::InvalidSession,
        ERROR_BAD_CREDENTIALS => CallError::BadCredentials(failure.message),
        code => CallError::Api(format!("last.fm error {code}: {}", failure.message)),
    }
}

fn duration_ms(value: &serde_json::Value) -> Option<u64> {
    let ms = match value {
        serde_json::Value::String(text) => text.parse::<u64>().ok()?,
        serde_json::Value::Number(number) => number.as_u64()?,
        _ => return None,
    };
    // The catalogue reports 0 when it does not know the length
    if ms == 0 {
        None
    } else {
        Some(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signature_vector() {
        let mut params = BTreeMap::new();
        params.insert("method", "auth.getMobileSession".to_string());
        params.insert("api_key", "key123".to_string());
        params.insert("username", "alice".to_string());
        params.insert("password", "hunter2".to_string());

        assert_eq!(
            signature(&params, "topsecret"),
            "f2322f0462a8dbf616da12e9c165b3d3"
        );
    }

    #[test]
    fn test_signature_is_order_independent() {
        // BTreeMap sorts by name, so insertion order must not matter
        let mut params = BTreeMap::new();
        params.insert("sk", "abc123".to_string());
        params.insert("method", "auth.getMobileSession".to_string());
        params.insert("api_key", "key123".to_string());

        assert_eq!(
            signature(&params, "topsecret"),
            "254a42a5685dcffaf524dfd21a322a17"
        );
    }

    #[test]
    fn test_parse_recent_tracks() {
        let payload = json!({
            "recenttracks": {
                "track": [{
                    "name": "Svefn-g-englar",
                    "artist": {"#text": "Sigur Rós", "mbid": ""},
                    "image": [
                        {"#text": "https://lastfm.freetls.fastly.net/i/u/34s/cover.png", "size": "small"},
                        {"#text": "https://lastfm.freetls.fastly.net/i/u/300x300/cover.png", "size": "extralarge"}
                    ],
                    "mbid": "7c4b9e3a",
                    "url": "https://www.last.fm/music/Sigur+R%C3%B3s/_/Svefn-g-englar",
                    "@attr": {"nowplaying": "true"}
                }]
            }
        });

        let response: RecentTracksResponse = serde_json::from_value(payload).unwrap();
        let track = &response.recenttracks.track[0];
        assert_eq!(track.name, "Svefn-g-englar");
        assert_eq!(track.artist.text, "Sigur Rós");
        assert_eq!(track.image.len(), 2);
        assert!(track.image[1].url.contains("300x300"));
        assert!(track.is_now_playing());
    }

    #[test]
    fn test_finished_scrobble_is_not_now_playing() {
        let payload = json!({
            "name": "Starálfur",
            "artist": {"#text": "Sigur Rós"},
            "url": "https://www.last.fm/music/Sigur+R%C3%B3s/_/Star%C3%A1lfur",
            "date": {"uts": "1700000000", "#text": "14 Nov 2023, 22:13"}
        });
        let track: RecentTrack = serde_json::from_value(payload).unwrap();
        assert!(!track.is_now_playing());
    }

    #[test]
    fn test_classify_errors() {
        let failure: ApiFailure =
            serde_json::from_value(json!({"error": 9, "message": "Invalid session key"})).unwrap();
        assert!(matches!(classify(failure), CallError::InvalidSession));

        let failure: ApiFailure =
            serde_json::from_value(json!({"error": 4, "message": "Authentication Failed"}))
                .unwrap();
        assert!(matches!(classify(failure), CallError::BadCredentials(_)));

        let failure: ApiFailure =
            serde_json::from_value(json!({"error": 29, "message": "Rate limit exceeded"})).unwrap();
        assert!(matches!(classify(failure), CallError::Api(_)));
    }

    #[test]
    fn test_duration_coercion() {
        assert_eq!(duration_ms(&json!("330226")), Some(330_226));
        assert_eq!(duration_ms(&json!(330226)), Some(330_226));
        // Unknown lengths come back as 0
        assert_eq!(duration_ms(&json!("0")), None);
        assert_eq!(duration_ms(&json!(0)), None);
        assert_eq!(duration_ms(&json!(null)), None);
        assert_eq!(duration_ms(&json!("not-a-number")), None);
    }
}
