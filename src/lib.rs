//! Normalized "now playing" state and transport control across music
//! backends.
//!
//! Three providers implement one contract: the Spotify Web API (PKCE auth,
//! full transport control for Premium accounts), Last.fm (read-only scrobble
//! feed) and the local MPRIS layer through playerctl. A [`session::MusicSession`]
//! owns one provider, drives its initialization and keeps refreshed tokens
//! flowing into the JSON credential store.
//!
//! Calls are blocking and must be serialized by the caller; the intended
//! consumer is a fixed-interval poll loop reading
//! [`providers::MusicProvider::now_playing`] after each
//! `update_status` call.

pub mod browser;
pub mod error;
pub mod models;
pub mod providers;
pub mod session;
pub mod settings;
