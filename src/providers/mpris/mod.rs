use std::io::{self, BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::ProviderError;
use crate::models::{InitStatus, NowPlaying};
use crate::providers::{AuthGrant, AuthRequest, MusicProvider};
use crate::settings::MusicSettings;

const PLAYERCTL: &str = "playerctl";
const NO_FOCUS: &str = "no media player owns focus";

// playerctl emits position and mpris:length in microseconds
const FOLLOW_FORMAT: &str = "{{playerName}}\t{{position}}\t{{mpris:length}}";

/// Local-session provider. Talks to whatever MPRIS player currently owns
/// media focus through playerctl: one-shot queries for status and metadata,
/// plus a `--follow` subscription feeding position/length updates. Requires
/// no authentication.
pub struct MprisProvider {
    status: NowPlaying,
    initialized: bool,
    subscription: Option<TimelineSubscription>,
    focused: Option<String>,
}

impl MprisProvider {
    pub fn new() -> Self {
        Self {
            status: NowPlaying::default(),
            initialized: false,
            subscription: None,
            focused: None,
        }
    }

    fn transport(&mut self, action: &str) -> Result<(), ProviderError> {
        if !self.initialized {
            return Err(ProviderError::NotInitialized);
        }
        let player = self
            .focused
            .clone()
            .ok_or_else(|| ProviderError::Backend(NO_FOCUS.to_string()))?;
        run_playerctl(&["--player", &player, action]).map(|_| ())
    }
}

impl Default for MprisProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MusicProvider for MprisProvider {
    // No authentication needed for the local session layer
    fn authenticate(&mut self, _request: AuthRequest) -> Result<Option<AuthGrant>, ProviderError> {
        Ok(None)
    }

    fn initialize(&mut self, _settings: &MusicSettings) -> Result<InitStatus, ProviderError> {
        if self.subscription.is_none() {
            match TimelineSubscription::start() {
                Ok(subscription) => self.subscription = Some(subscription),
                Err(err) => {
                    // Status polling still works from one-shot queries;
                    // position and length just stay unknown.
                    log::warn!("could not start the playerctl timeline subscription: {err}");
                }
            }
        }
        self.initialized = true;
        Ok(InitStatus::Success)
    }

    fn play(&mut self) -> Result<(), ProviderError> {
        self.transport("play")
    }

    fn pause(&mut self) -> Result<(), ProviderError> {
        self.transport("pause")
    }

    fn skip(&mut self) -> Result<(), ProviderError> {
        self.transport("next")
    }

    fn rewind(&mut self) -> Result<(), ProviderError> {
        self.transport("previous")
    }

    fn update_status(&mut self) -> Result<(), ProviderError> {
        if !self.initialized {
            return Err(ProviderError::NotInitialized);
        }

        // Re-resolve focus on every call instead of trusting the event feed
        let focused = list_players()?.into_iter().next();
        if let Some(subscription) = &self.subscription {
            subscription
                .state
                .lock()
                .expect("timeline mutex poisoned")
                .set_focused(focused.clone());
        }
        self.focused = focused.clone();

        let Some(player) = focused else {
            self.status.clear();
            return Ok(());
        };

        let playback = run_playerctl(&["--player", &player, "status"])?;
        if playback != "Playing" {
            self.status.clear();
            return Ok(());
        }

        let title = metadata(&player, "xesam:title").unwrap_or_default();
        let artist = metadata(&player, "xesam:artist");

        let (position_ms, length_ms) = match &self.subscription {
            Some(subscription) => {
                let state = subscription.state.lock().expect("timeline mutex poisoned");
                (state.position_ms, state.length_ms)
            }
            None => (None, None),
        };

        self.status = NowPlaying {
            playing: true,
            title,
            artists: artist.into_iter().collect(),
            // This layer has no web icons and no stable id or URI
            icons: Vec::new(),
            position_ms,
            length_ms,
            track_id: String::new(),
            track_url: String::new(),
        };
        Ok(())
    }

    fn now_playing(&self) -> &NowPlaying {
        &self.status
    }

    fn shutdown(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.stop();
        }
        self.initialized = false;
        self.focused = None;
        self.status.clear();
    }
}

/// Timeline state fed by the follow thread. `focused` is rewritten by
/// `update_status`; events for any other player are discarded.
#[derive(Debug, Default)]
struct TimelineState {
    focused: Option<String>,
    position_ms: Option<u64>,
    length_ms: Option<u64>,
}

impl TimelineState {
    fn set_focused(&mut self, player: Option<String>) {
        if self.focused != player {
            // Focus moved: the old timeline no longer applies
            self.position_ms = None;
            self.length_ms = None;
        }
        self.focused = player;
    }

    fn apply(&mut self, event: TimelineEvent) {
        match &self.focused {
            Some(focused) if *focused == event.player => {
                self.position_ms = event.position_ms;
                self.length_ms = event.length_ms;
            }
            _ => log::trace!("discarding timeline event from {}", event.player),
        }
    }
}

#[derive(Debug, PartialEq)]
struct TimelineEvent {
    player: String,
    position_ms: Option<u64>,
    length_ms: Option<u64>,
}

/// A `playerctl --follow` child process plus the reader thread translating
/// its output into timeline state. Explicit lifecycle: started during
/// `initialize`, stopped by `shutdown` or drop.
struct TimelineSubscription {
    child: Child,
    state: Arc<Mutex<TimelineState>>,
    reader: Option<JoinHandle<()>>,
}

impl TimelineSubscription {
    fn start() -> io::Result<Self> {
        let mut child = Command::new(PLAYERCTL)
            .args([
                "--all-players",
                "--follow",
                "metadata",
                "--format",
                FOLLOW_FORMAT,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "playerctl child has no stdout")
        })?;

        let state = Arc::new(Mutex::new(TimelineState::default()));
        let shared = Arc::clone(&state);
        let reader = thread::Builder::new()
            .name("mpris-timeline".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if let Some(event) = parse_timeline_line(&line) {
                        shared
                            .lock()
                            .expect("timeline mutex poisoned")
                            .apply(event);
                    }
                }
                log::debug!("mpris timeline subscription ended");
            })?;

        Ok(Self {
            child,
            state,
            reader: Some(reader),
        })
    }

    fn stop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for TimelineSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Lines look like `spotify\t61234567\t330226000`; either number can be
/// missing when the player does not report it.
fn parse_timeline_line(line: &str) -> Option<TimelineEvent> {
    let mut fields = line.split('\t');
    let player = fields.next()?.trim();
    if player.is_empty() {
        return None;
    }
    let position_ms = fields.next().and_then(parse_micros);
    let length_ms = fields.next().and_then(parse_micros);

    Some(TimelineEvent {
        player: player.to_string(),
        position_ms,
        length_ms,
    })
}

fn parse_micros(raw: &str) -> Option<u64> {
    let micros: u64 = raw.trim().parse().ok()?;
    Some(micros / 1000)
}

fn run_playerctl(args: &[&str]) -> Result<String, ProviderError> {
    let output = Command::new(PLAYERCTL)
        .args(args)
        .output()
        .map_err(|err| ProviderError::Backend(format!("failed to run playerctl: {err}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ProviderError::Backend(format!(
            "playerctl {} failed: {stderr}",
            args.join(" ")
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Running players, focused one first. playerctl exits nonzero when none
/// are running; that is the empty list, not an error.
fn list_players() -> Result<Vec<String>, ProviderError> {
    let output = Command::new(PLAYERCTL)
        .arg("--list-all")
        .output()
        .map_err(|err| ProviderError::Backend(format!("failed to run playerctl: {err}")))?;

    if !output.status.success() {
        return Ok(Vec::new());
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Metadata keys that the player does not expose make playerctl exit
/// nonzero; that maps to None rather than an error.
fn metadata(player: &str, key: &str) -> Option<String> {
    run_playerctl(&["--player", player, "metadata", key])
        .ok()
        .filter(|value| !value.is_empty())
}
