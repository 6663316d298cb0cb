use anyhow::{anyhow, Result};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use nowplay::{
    models::{InitStatus, NowPlaying},
    providers::{
        lastfm::LastfmProvider, mpris::MprisProvider, spotify::SpotifyProvider, AuthRequest,
        MusicProvider,
    },
    session::MusicSession,
    settings::MusicSettings,
};

const SETTINGS_FILE: &str = "nowplay.settings.json";
const CONTROLS: &str =
    "--=== s: skip | r: rewind | p: pause | u: play | d: play track (spotify) | q: quit ===--";

#[derive(Clone, Copy, PartialEq)]
enum ProviderKind {
    Spotify,
    Lastfm,
    Media,
}

fn main() -> Result<()> {
    // Load .env file if it exists
    dotenv::dotenv().ok();
    env_logger::init();

    let choice = std::env::args()
        .nth(1)
        .unwrap_or_else(|| prompt("Provider (spotify/lastfm/media): "));
    let kind = match choice.trim().to_lowercase().as_str() {
        "spotify" => ProviderKind::Spotify,
        "lastfm" => ProviderKind::Lastfm,
        "media" => ProviderKind::Media,
        other => return Err(anyhow!("unknown provider: {other}")),
    };

    let settings = MusicSettings::load(SETTINGS_FILE)?;
    let provider: Box<dyn MusicProvider + Send> = match kind {
        ProviderKind::Spotify => Box::new(SpotifyProvider::new()),
        ProviderKind::Lastfm => Box::new(LastfmProvider::new()),
        ProviderKind::Media => Box::new(MprisProvider::new()),
    };
    let mut session = MusicSession::new(provider, settings);

    ensure_credentials(&mut session, kind)?;

    if session.initialize()? == InitStatus::NotAuthorized {
        return Err(anyhow!("failed to authenticate with the backend"));
    }

    println!("{CONTROLS}");

    let session = Arc::new(Mutex::new(session));
    let poller = Arc::clone(&session);

    // Poll once a second; transport commands interleave through the same
    // lock so provider calls never overlap.
    thread::spawn(move || loop {
        if let Ok(mut session) = poller.lock() {
            match session.provider_mut().update_status() {
                Ok(()) => print_status(session.provider().now_playing()),
                Err(err) => eprintln!("status update failed: {err}"),
            }
        }
        thread::sleep(Duration::from_secs(1));
    });

    loop {
        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let command = line.trim().to_string();
        // Prompt before taking the session lock so the poll thread keeps
        // running while the user types
        let uri = if command == "d" {
            Some(prompt("Track uri to play: "))
        } else {
            None
        };

        let Ok(mut session) = session.lock() else {
            break;
        };
        let result = match command.as_str() {
            "s" => session.provider_mut().skip(),
            "r" => session.provider_mut().rewind(),
            "p" => session.provider_mut().pause(),
            "u" => session.provider_mut().play(),
            "d" => match session.provider_mut().track_launcher() {
                Some(launcher) => {
                    let uri = uri.unwrap_or_default();
                    if uri.is_empty() {
                        Ok(())
                    } else {
                        launcher.play_track(&uri)
                    }
                }
                None => {
                    println!("this provider cannot launch tracks");
                    Ok(())
                }
            },
            "q" => {
                session.shutdown();
                break;
            }
            _ => Ok(()),
        };
        if let Err(err) = result {
            eprintln!("command failed: {err}");
        }
    }

    Ok(())
}

fn ensure_credentials(session: &mut MusicSession, kind: ProviderKind) -> Result<()> {
    match kind {
        ProviderKind::Spotify => {
            let mut client_id = session.settings().read(|data| data.spotify_client_id.clone());
            if client_id.is_empty() {
                client_id = env_or_prompt("SPOTIFY_CLIENT_ID", "Spotify client id: ");
                if client_id.is_empty() {
                    return Err(anyhow!("a Spotify client id is required"));
                }
                let id = client_id.clone();
                session
                    .settings()
                    .update(|data| data.spotify_client_id = id)?;
            }

            if session.settings().read(|data| data.spotify_token.is_none()) {
                println!("Waiting for the browser sign-in to finish...");
                session.authenticate(AuthRequest::SpotifyPkce { client_id })?;
            }
        }
        ProviderKind::Lastfm => {
            let mut api_key = session.settings().read(|data| data.lastfm_api_key.clone());
            let mut api_secret = session.settings().read(|data| data.lastfm_api_secret.clone());
            if api_key.is_empty() || api_secret.is_empty() {
                api_key = env_or_prompt("LASTFM_API_KEY", "Last.fm api key: ");
                api_secret = env_or_prompt("LASTFM_API_SECRET", "Last.fm api secret: ");
                if api_key.is_empty() || api_secret.is_empty() {
                    return Err(anyhow!("a Last.fm api key and secret are required"));
                }
                let (key, secret) = (api_key.clone(), api_secret.clone());
                session.settings().update(|data| {
                    data.lastfm_api_key = key;
                    data.lastfm_api_secret = secret;
                })?;
            }

            if session.settings().read(|data| data.lastfm_session.is_none()) {
                let username = env_or_prompt("LASTFM_USERNAME", "Last.fm username: ");
                let password = env_or_prompt("LASTFM_PASSWORD", "Last.fm password: ");
                session.authenticate(AuthRequest::LastfmLogin {
                    api_key,
                    api_secret,
                    username,
                    password,
                })?;
            }
        }
        ProviderKind::Media => {}
    }
    Ok(())
}

fn print_status(status: &NowPlaying) {
    if !status.playing {
        println!("Nothing playing");
        return;
    }

    println!("{} - {}", status.artists.join(", "), status.title);
    match (status.position_ms, status.length_ms) {
        (Some(position), Some(length)) => {
            println!("{} / {}", format_ms(position), format_ms(length));
        }
        (None, Some(length)) => println!("{}", format_ms(length)),
        _ => {}
    }
    if !status.track_url.is_empty() {
        println!("{}", status.track_url);
    }
}

fn format_ms(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!("{:02}m:{:02}s", total_secs / 60, total_secs % 60)
}

fn env_or_prompt(var: &str, message: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| prompt(message))
}

fn prompt(message: &str) -> String {
    print!("{message}");
    let _ = io::stdout().flush();
    let mut line = String::new();
    let _ = io::stdin().read_line(&mut line);
    line.trim().to_string()
}
