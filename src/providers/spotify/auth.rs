use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use super::api::CallError;
use crate::error::ProviderError;
use crate::settings::SpotifyToken;

const AUTH_URL: &str = "https://accounts.spotify.com/authorize";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// All providers that can use a loopback redirect share this port.
pub const CALLBACK_PORT: u16 = 1643;
const CALLBACK_PATH: &str = "/callback";
const REDIRECT_URI: &str = "http://127.0.0.1:1643/callback";

const CALLBACK_READ_TIMEOUT_SECS: u64 = 5;
const CALLBACK_PAGE: &str =
    "<html><body>Authentication complete. You can close this window.</body></html>";

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    /// The token endpoint omits this on refresh responses.
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

impl TokenResponse {
    /// Convert to a stored token, keeping the previous refresh token when
    /// the endpoint did not send a new one.
    pub fn into_token(self, previous_refresh: Option<String>) -> SpotifyToken {
        let refresh = self.refresh_token.or(previous_refresh).unwrap_or_default();
        SpotifyToken::new(self.access_token, refresh, self.expires_in)
    }
}

pub(crate) struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let verifier_bytes: Vec<u8> = (0..32).map(|_| rng.gen::<u8>()).collect();
        let verifier = URL_SAFE_NO_PAD.encode(&verifier_bytes);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

        Self {
            verifier,
            challenge,
        }
    }
}

pub(crate) fn build_auth_url(client_id: &str, code_challenge: &str) -> String {
    let scopes = [
        "user-read-playback-state",
        "user-modify-playback-state",
        "user-read-private",
    ]
    .join(" ");

    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&code_challenge_method=S256&code_challenge={}",
        AUTH_URL,
        urlencoding::encode(client_id),
        urlencoding::encode(REDIRECT_URI),
        urlencoding::encode(&scopes),
        code_challenge
    )
}

/// Bind the loopback listener and wait for the authorization redirect on a
/// background thread. The returned channel yields the `code` query value of
/// the first `/callback` request; the listener answers that one request and
/// shuts down immediately after, whatever happens to the code later.
pub(crate) fn listen_for_code() -> Result<Receiver<String>, ProviderError> {
    let listener = TcpListener::bind(("127.0.0.1", CALLBACK_PORT)).map_err(|err| {
        ProviderError::Auth(format!(
            "could not bind the auth callback listener on port {CALLBACK_PORT}: {err}"
        ))
    })?;

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("spotify-auth-callback".into())
        .spawn(move || run_callback_listener(listener, tx))
        .map_err(|err| ProviderError::Auth(format!("could not start the callback thread: {err}")))?;

    Ok(rx)
}

fn run_callback_listener(listener: TcpListener, tx: Sender<String>) {
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("auth callback connection failed: {err}");
                continue;
            }
        };

        let request_line = match read_request_line(&mut stream) {
            Ok(line) => line,
            Err(err) => {
                log::warn!("failed to read auth callback request: {err}");
                let _ = write_response(&mut stream, 400, "Bad Request", "bad request");
                continue;
            }
        };

        match extract_code(&request_line) {
            Some(code) => {
                let _ = write_response(&mut stream, 200, "OK", CALLBACK_PAGE);
                let _ = tx.send(code);
                // One code is all we take; drop the listener right away.
                break;
            }
            None => {
                // Browsers also ask for favicons
                let _ = write_response(&mut stream, 404, "Not Found", "not found");
            }
        }
    }
    log::debug!("auth callback listener stopped");
}

fn read_request_line(stream: &mut TcpStream) -> io::Result<String> {
    stream.set_read_timeout(Some(Duration::from_secs(CALLBACK_READ_TIMEOUT_SECS)))?;
    let mut reader = BufReader::new(&mut *stream);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "missing request line",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn write_response<W: Write>(out: &mut W, status: u16, reason: &str, body: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    out.write_all(response.as_bytes())
}

/// Pull the authorization code out of a request line like
/// `GET /callback?code=AQD...&state=x HTTP/1.1`.
fn extract_code(request_line: &str) -> Option<String> {
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    if method != "GET" {
        return None;
    }

    let (path, query) = target.split_once('?')?;
    if path != CALLBACK_PATH {
        return None;
    }

    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == "code" && !value.is_empty() {
                return Some(
                    urlencoding::decode(value)
                        .map(|decoded| decoded.into_owned())
                        .unwrap_or_else(|_| value.to_string()),
                );
            }
        }
    }
    None
}

pub(crate) fn exchange_code(
    http: &reqwest::blocking::Client,
    client_id: &str,
    code: &str,
    code_verifier: &str,
) -> Result<TokenResponse, CallError> {
    // PKCE exchange: no client secret, the verifier takes its place
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", REDIRECT_URI),
        ("client_id", client_id),
        ("code_verifier", code_verifier),
    ];
    post_token_request(http, &params)
}

pub(crate) fn refresh_token(
    http: &reqwest::blocking::Client,
    client_id: &str,
    refresh_token: &str,
) -> Result<TokenResponse, CallError> {
    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
    ];
    post_token_request(http, &params)
}

fn post_token_request(
    http: &reqwest::blocking::Client,
    params: &[(&str, &str)],
) -> Result<TokenResponse, CallError> {
    let response = http.post(TOKEN_URL).form(params).send()?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        if body.contains("invalid_grant") {
            return Err(CallError::InvalidGrant);
        }
        return Err(CallError::Api(status, body));
    }

    Ok(response.json()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_challenge_shape() {
        let pkce = PkceChallenge::generate();

        // 32 random bytes become 43 chars of unpadded url-safe base64
        assert_eq!(pkce.verifier.len(), 43);
        assert!(pkce
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

        // Challenge must be the base64url SHA-256 of the verifier
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()));
        assert_eq!(pkce.challenge, expected);
    }

    #[test]
    fn test_pkce_challenges_are_unique() {
        let a = PkceChallenge::generate();
        let b = PkceChallenge::generate();
        assert_ne!(a.verifier, b.verifier);
    }

    #[test]
    fn test_build_auth_url() {
        let url = build_auth_url("client123", "challenge456");
        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client123"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("code_challenge=challenge456"));
        assert!(url.contains(&urlencoding::encode(REDIRECT_URI).into_owned()));
        assert!(url.contains("user-read-playback-state"));
    }

    #[test]
    fn test_extract_code() {
        assert_eq!(
            extract_code("GET /callback?code=AQDtoken123 HTTP/1.1"),
            Some("AQDtoken123".to_string())
        );
        assert_eq!(
            extract_code("GET /callback?state=xyz&code=abc HTTP/1.1"),
            Some("abc".to_string())
        );

        // Percent-encoded codes come back decoded
        assert_eq!(
            extract_code("GET /callback?code=a%2Fb%3Dc HTTP/1.1"),
            Some("a/b=c".to_string())
        );

        // Wrong path, wrong method, missing or empty code
        assert_eq!(extract_code("GET /favicon.ico HTTP/1.1"), None);
        assert_eq!(extract_code("POST /callback?code=abc HTTP/1.1"), None);
        assert_eq!(extract_code("GET /callback?error=access_denied HTTP/1.1"), None);
        assert_eq!(extract_code("GET /callback?code= HTTP/1.1"), None);
        assert_eq!(extract_code("GET /callback HTTP/1.1"), None);
        assert_eq!(extract_code(""), None);
    }

    #[test]
    fn test_write_response_format() {
        let mut out = Vec::new();
        write_response(&mut out, 200, "OK", "hello").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_token_response_keeps_previous_refresh_token() {
        let response = TokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: None,
            expires_in: 3600,
        };
        let token = response.into_token(Some("old-refresh".to_string()));
        assert_eq!(token.access_token, "new-access");
        assert_eq!(token.refresh_token, "old-refresh");

        let response = TokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: Some("new-refresh".to_string()),
            expires_in: 3600,
        };
        let token = response.into_token(Some("old-refresh".to_string()));
        assert_eq!(token.refresh_token, "new-refresh");
    }
}
