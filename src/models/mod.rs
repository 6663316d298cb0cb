use serde::{Deserialize, Serialize};

/// Normalized now-playing state. Each provider owns one of these and
/// rewrites it on every `update_status` call.
///
/// Invariant: when `playing` is false every other field holds its default
/// empty value. Providers never report stale track data alongside a
/// not-playing flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NowPlaying {
    pub playing: bool,
    pub title: String,
    pub artists: Vec<String>,
    pub icons: Vec<SongIcon>,
    /// Playback position in milliseconds. None when the backend cannot
    /// report a position or nothing is playing.
    pub position_ms: Option<u64>,
    /// Track length in milliseconds. None when unknown.
    pub length_ms: Option<u64>,
    /// Backend identifier for the track. Empty when the backend has no
    /// stable id concept.
    pub track_id: String,
    /// Backend URI for the track. Empty when the backend has no URI concept.
    pub track_url: String,
}

impl NowPlaying {
    /// Reset to the empty snapshot.
    pub fn clear(&mut self) {
        *self = NowPlaying::default();
    }

    /// Played fraction as a percentage, when both position and length are
    /// known and the length is nonzero.
    pub fn progress(&self) -> Option<f32> {
        match (self.position_ms, self.length_ms) {
            (Some(pos), Some(len)) if len > 0 => Some((pos as f32 / len as f32) * 100.0),
            _ => None,
        }
    }
}

/// Web icon for the current track. Field support varies by provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongIcon {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub url: Option<String>,
}

/// Outcome of a provider's initialization phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    /// The provider is ready for status and transport calls.
    Success,
    /// The provider could not authenticate with its backend.
    NotAuthorized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_resets_every_field() {
        let mut status = NowPlaying {
            playing: true,
            title: "Teardrop".to_string(),
            artists: vec!["Massive Attack".to_string()],
            icons: vec![SongIcon {
                width: Some(640),
                height: Some(640),
                url: Some("https://example.com/cover.jpg".to_string()),
            }],
            position_ms: Some(61_000),
            length_ms: Some(330_000),
            track_id: "67Hna13dNDkZvBpTXRIaOJ".to_string(),
            track_url: "spotify:track:67Hna13dNDkZvBpTXRIaOJ".to_string(),
        };

        status.clear();
        assert_eq!(status, NowPlaying::default());
        assert!(!status.playing);
        assert!(status.title.is_empty());
        assert!(status.artists.is_empty());
        assert!(status.icons.is_empty());
        assert_eq!(status.position_ms, None);
        assert_eq!(status.length_ms, None);
        assert!(status.track_id.is_empty());
        assert!(status.track_url.is_empty());
    }

    #[test]
    fn test_progress() {
        let mut status = NowPlaying {
            playing: true,
            position_ms: Some(30_000),
            length_ms: Some(120_000),
            ..NowPlaying::default()
        };
        assert_eq!(status.progress(), Some(25.0));

        // At the end
        status.position_ms = Some(120_000);
        assert_eq!(status.progress(), Some(100.0));

        // No position
        status.position_ms = None;
        assert_eq!(status.progress(), None);

        // No length
        status.position_ms = Some(30_000);
        status.length_ms = None;
        assert_eq!(status.progress(), None);

        // Zero length must not divide
        status.length_ms = Some(0);
        assert_eq!(status.progress(), None);
    }
}
