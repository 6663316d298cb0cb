use crate::error::ProviderError;
use crate::models::InitStatus;
use crate::providers::{AuthGrant, AuthRequest, MusicProvider};
use crate::settings::MusicSettings;

/// Lifecycle of a [`MusicSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    NotAuthorized,
}

/// Owns exactly one provider and drives its authentication lifecycle:
/// wires token-refresh persistence into the credential store, runs
/// `initialize` with a single bounded retry, and persists authentication
/// grants. Status polling and transport commands go straight to the
/// provider afterwards.
pub struct MusicSession {
    provider: Box<dyn MusicProvider + Send>,
    settings: MusicSettings,
    state: SessionState,
}

impl MusicSession {
    pub fn new(provider: Box<dyn MusicProvider + Send>, settings: MusicSettings) -> Self {
        Self {
            provider,
            settings,
            state: SessionState::Uninitialized,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &MusicSettings {
        &self.settings
    }

    pub fn provider(&self) -> &dyn MusicProvider {
        self.provider.as_ref()
    }

    pub fn provider_mut(&mut self) -> &mut dyn MusicProvider {
        self.provider.as_mut()
    }

    /// Run the provider's authentication flow and persist whatever grant it
    /// returns.
    pub fn authenticate(
        &mut self,
        request: AuthRequest,
    ) -> Result<Option<AuthGrant>, ProviderError> {
        let grant = self.provider.authenticate(request)?;
        match &grant {
            Some(AuthGrant::Spotify(token)) => {
                let token = token.clone();
                self.settings
                    .update(|data| data.spotify_token = Some(token))?;
            }
            Some(AuthGrant::Lastfm(session)) => {
                let session = session.clone();
                self.settings
                    .update(|data| data.lastfm_session = Some(session))?;
            }
            None => {}
        }
        Ok(grant)
    }

    /// Initialize the provider against the stored credentials. Tokens the
    /// provider refreshes along the way are written back to the store as
    /// they arrive.
    pub fn initialize(&mut self) -> Result<InitStatus, ProviderError> {
        self.state = SessionState::Initializing;

        let sink = self.settings.clone();
        self.provider.set_token_listener(Box::new(move |token| {
            log::debug!("persisting refreshed access token");
            let token = token.clone();
            if let Err(err) = sink.update(|data| data.spotify_token = Some(token)) {
                log::warn!("failed to persist refreshed token: {err}");
            }
        }));

        let mut status = self.run_initialize()?;
        if status == InitStatus::NotAuthorized {
            // The first attempt may have refreshed or cleared a stale token;
            // one more try can then succeed. Never a third.
            status = self.run_initialize()?;
        }

        self.state = match status {
            InitStatus::Success => SessionState::Ready,
            InitStatus::NotAuthorized => SessionState::NotAuthorized,
        };
        Ok(status)
    }

    fn run_initialize(&mut self) -> Result<InitStatus, ProviderError> {
        match self.provider.initialize(&self.settings) {
            Ok(status) => Ok(status),
            Err(err) => {
                self.state = SessionState::Uninitialized;
                Err(err)
            }
        }
    }

    /// Tear down whatever the provider holds open and return to the
    /// uninitialized state.
    pub fn shutdown(&mut self) {
        self.provider.shutdown();
        self.state = SessionState::Uninitialized;
    }
}
