mod api;

use self::api::{CallError, LastfmApi, RecentTrack, RecentTracks};
use crate::error::ProviderError;
use crate::models::{InitStatus, NowPlaying, SongIcon};
use crate::providers::{AuthGrant, AuthRequest, MusicProvider};
use crate::settings::{MusicSettings, ScrobbleSession};

const NO_TRANSPORT: &str = "Last.fm does not provide playback control";

/// Scrobble-API provider. Read-only: the backend reports what is playing
/// but exposes no way to control it, so every transport command fails with
/// an unsupported-operation error.
pub struct LastfmProvider {
    status: NowPlaying,
    api: Option<LastfmApi>,
    session: Option<ScrobbleSession>,
    durations: DurationCache,
}

impl LastfmProvider {
    pub fn new() -> Self {
        Self {
            status: NowPlaying::default(),
            api: None,
            session: None,
            durations: DurationCache::default(),
        }
    }
}

impl Default for LastfmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MusicProvider for LastfmProvider {
    fn authenticate(&mut self, request: AuthRequest) -> Result<Option<AuthGrant>, ProviderError> {
        let AuthRequest::LastfmLogin {
            api_key,
            api_secret,
            username,
            password,
        } = request
        else {
            return Err(ProviderError::Auth(
                "last.fm authentication takes an api key, secret, username and password"
                    .to_string(),
            ));
        };

        let api = LastfmApi::new(api_key, api_secret);
        let session = api
            .get_mobile_session(&username, &password)
            .map_err(ProviderError::from)?;
        log::info!("obtained last.fm session for {}", session.username);
        Ok(Some(AuthGrant::Lastfm(session)))
    }

    fn initialize(&mut self, settings: &MusicSettings) -> Result<InitStatus, ProviderError> {
        let (api_key, api_secret, session) = settings.read(|data| {
            (
                data.lastfm_api_key.clone(),
                data.lastfm_api_secret.clone(),
                data.lastfm_session.clone(),
            )
        });
        let Some(session) = session else {
            return Ok(InitStatus::NotAuthorized);
        };

        let api = LastfmApi::new(api_key, api_secret).with_session(session.session_key.clone());
        match api.validate_session() {
            Ok(()) => {
                self.api = Some(api);
                self.session = Some(session);
                Ok(InitStatus::Success)
            }
            Err(CallError::InvalidSession) => {
                log::info!("stored last.fm session was rejected, clearing it");
                settings.update(|data| data.lastfm_session = None)?;
                Ok(InitStatus::NotAuthorized)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn play(&mut self) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported(NO_TRANSPORT.to_string()))
    }

    fn pause(&mut self) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported(NO_TRANSPORT.to_string()))
    }

    fn skip(&mut self) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported(NO_TRANSPORT.to_string()))
    }

    fn rewind(&mut self) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported(NO_TRANSPORT.to_string()))
    }

    fn update_status(&mut self) -> Result<(), ProviderError> {
        let api = self.api.as_ref().ok_or(ProviderError::NotInitialized)?;
        let session = self.session.as_ref().ok_or(ProviderError::NotInitialized)?;

        let recent = api
            .recent_tracks(&session.username)
            .map_err(ProviderError::from)?;
        let Some(track) = current_track(recent) else {
            self.status.clear();
            return Ok(());
        };

        // The length needs a second lookup; only pay for it when the track
        // actually changed.
        let length_ms = self
            .durations
            .resolve(&track.name, &track.artist.text, || {
                api.track_info(&track.artist.text, &track.name)
                    .map_err(ProviderError::from)
            })?;

        self.status = snapshot_from(track, length_ms);
        Ok(())
    }

    fn now_playing(&self) -> &NowPlaying {
        &self.status
    }
}

/// The track to report: the newest scrobble, but only while the backend
/// still flags it as in progress.
fn current_track(recent: RecentTracks) -> Option<RecentTrack> {
    recent
        .track
        .into_iter()
        .next()
        .filter(RecentTrack::is_now_playing)
}

fn snapshot_from(track: RecentTrack, length_ms: Option<u64>) -> NowPlaying {
    NowPlaying {
        playing: true,
        title: track.name,
        artists: vec![track.artist.text],
        icons: track
            .image
            .into_iter()
            .map(|image| SongIcon {
                width: None,
                height: None,
                url: if image.url.is_empty() {
                    None
                } else {
                    Some(image.url)
                },
            })
            .collect(),
        // The backend cannot report a playback offset
        position_ms: None,
        length_ms,
        track_id: track.mbid,
        track_url: track.url,
    }
}

/// Single-entry memo for the track-info lookup, keyed on the
/// (name, artist) pair of the last successful fetch.
#[derive(Default)]
struct DurationCache {
    key: Option<(String, String)>,
    length_ms: Option<u64>,
}

impl DurationCache {
    fn resolve(
        &mut self,
        name: &str,
        artist: &str,
        fetch: impl FnOnce() -> Result<Option<u64>, ProviderError>,
    ) -> Result<Option<u64>, ProviderError> {
        if self
            .key
            .as_ref()
            .is_some_and(|(cached_name, cached_artist)| cached_name == name && cached_artist == artist)
        {
            return Ok(self.length_ms);
        }

        let length_ms = fetch()?;
        self.key = Some((name.to_string(), artist.to_string()));
        self.length_ms = length_ms;
        Ok(length_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    fn now_playing_fixture() -> RecentTracks {
        serde_json::from_value(json!({
            "track": [{
                "name": "Svefn-g-englar",
                "artist": {"#text": "Sigur Rós"},
                "image": [
                    {"#text": "https://lastfm.freetls.fastly.net/i/u/300x300/cover.png", "size": "extralarge"},
                    {"#text": "", "size": "small"}
                ],
                "mbid": "7c4b9e3a",
                "url": "https://www.last.fm/music/Sigur+R%C3%B3s/_/Svefn-g-englar",
                "@attr": {"nowplaying": "true"}
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_transport_always_unsupported() {
        // Before initialization
        let mut provider = LastfmProvider::new();
        assert!(matches!(provider.play(), Err(ProviderError::Unsupported(_))));
        assert!(matches!(provider.pause(), Err(ProviderError::Unsupported(_))));
        assert!(matches!(provider.skip(), Err(ProviderError::Unsupported(_))));
        assert!(matches!(provider.rewind(), Err(ProviderError::Unsupported(_))));

        // And with a live session: still unsupported
        provider.api = Some(LastfmApi::new("key".to_string(), "secret".to_string()));
        provider.session = Some(ScrobbleSession {
            username: "alice".to_string(),
            session_key: "abc".to_string(),
            subscriber: false,
        });
        assert!(matches!(provider.play(), Err(ProviderError::Unsupported(_))));
        assert!(matches!(provider.rewind(), Err(ProviderError::Unsupported(_))));
    }

    #[test]
    fn test_update_status_before_initialize() {
        let mut provider = LastfmProvider::new();
        assert!(matches!(
            provider.update_status(),
            Err(ProviderError::NotInitialized)
        ));
    }

    #[test]
    fn test_track_launcher_not_offered() {
        let mut provider = LastfmProvider::new();
        assert!(provider.track_launcher().is_none());
    }

    #[test]
    fn test_current_track_selection() {
        assert!(current_track(now_playing_fixture()).is_some());

        // Finished scrobbles collapse to nothing
        let finished: RecentTracks = serde_json::from_value(json!({
            "track": [{
                "name": "Starálfur",
                "artist": {"#text": "Sigur Rós"},
                "url": "https://www.last.fm/music/Sigur+R%C3%B3s/_/Star%C3%A1lfur",
                "date": {"uts": "1700000000"}
            }]
        }))
        .unwrap();
        assert!(current_track(finished).is_none());

        // An empty history too
        let empty: RecentTracks = serde_json::from_value(json!({"track": []})).unwrap();
        assert!(current_track(empty).is_none());
    }

    #[test]
    fn test_snapshot_mapping() {
        let track = current_track(now_playing_fixture()).unwrap();
        let status = snapshot_from(track, Some(600_000));

        assert!(status.playing);
        assert_eq!(status.title, "Svefn-g-englar");
        assert_eq!(status.artists, vec!["Sigur Rós"]);
        assert_eq!(status.icons.len(), 2);
        assert!(status.icons[0].url.is_some());
        // Empty image slots map to no url
        assert!(status.icons[1].url.is_none());
        assert_eq!(status.icons[0].width, None);
        assert_eq!(status.position_ms, None);
        assert_eq!(status.length_ms, Some(600_000));
        assert_eq!(status.track_id, "7c4b9e3a");
        assert!(!status.track_url.is_empty());
    }

    #[test]
    fn test_duration_cache_fetches_once_per_pair() {
        let mut cache = DurationCache::default();
        let calls = Cell::new(0);

        let fetch = || {
            calls.set(calls.get() + 1);
            Ok(Some(330_000))
        };
        assert_eq!(cache.resolve("Teardrop", "Massive Attack", fetch).unwrap(), Some(330_000));
        assert_eq!(calls.get(), 1);

        // Same pair: served from the cache
        let fetch = || {
            calls.set(calls.get() + 1);
            Ok(Some(999_999))
        };
        assert_eq!(cache.resolve("Teardrop", "Massive Attack", fetch).unwrap(), Some(330_000));
        assert_eq!(calls.get(), 1);

        // Changed pair: one more lookup
        let fetch = || {
            calls.set(calls.get() + 1);
            Ok(None)
        };
        assert_eq!(cache.resolve("Angel", "Massive Attack", fetch).unwrap(), None);
        assert_eq!(calls.get(), 2);

        // And the unknown length is cached for the new pair
        let fetch = || {
            calls.set(calls.get() + 1);
            Ok(Some(1))
        };
        assert_eq!(cache.resolve("Angel", "Massive Attack", fetch).unwrap(), None);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_duration_cache_retries_after_failure() {
        let mut cache = DurationCache::default();
        let calls = Cell::new(0);

        let failing = || {
            calls.set(calls.get() + 1);
            Err(ProviderError::Backend("timeout".to_string()))
        };
        assert!(cache.resolve("Teardrop", "Massive Attack", failing).is_err());
        assert_eq!(calls.get(), 1);

        // The failed lookup must not be cached
        let fetch = || {
            calls.set(calls.get() + 1);
            Ok(Some(330_000))
        };
        assert_eq!(cache.resolve("Teardrop", "Massive Attack", fetch).unwrap(), Some(330_000));
        assert_eq!(calls.get(), 2);
    }
}
