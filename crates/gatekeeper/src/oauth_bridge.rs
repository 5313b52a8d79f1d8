//! Provider sign-in over the OAuth 2.0 authorization-code flow with PKCE.
//!
//! ```text
//! Idle ──Start──► AwaitingProviderResponse ──CodeReceived──► ExchangingToken
//!  ▲                     │                                        │
//!  └────Abandoned────────┘                            TokenReceived
//!                                                                 ▼
//!  Failed ◄──────Fail (any step)─────────────────────── FetchingProfile
//!                                                                 │ ProfileReceived
//!                                                                 ▼
//!                                                            Established
//! ```
//!
//! The bridge never touches the session. It returns a `ProviderGrant` and
//! the session manager decides what to do with it.

use crate::oauth::BrowserHandoff;
use crate::{SessionError, SessionResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bazaar_config::OAuthSettings;
use bazaar_storage::{Role, RoleDescriptor, UserProfile};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_fsm::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub oauth_machine(Idle)

    Idle => {
        Start => AwaitingProviderResponse
    },
    AwaitingProviderResponse => {
        CodeReceived => ExchangingToken,
        Abandoned => Idle,
        Fail => Failed
    },
    ExchangingToken => {
        TokenReceived => FetchingProfile,
        Fail => Failed
    },
    FetchingProfile => {
        ProfileReceived => Established,
        Fail => Failed
    },
    Established => {
        Start => AwaitingProviderResponse
    },
    Failed => {
        Start => AwaitingProviderResponse
    }
}

pub use oauth_machine::Input as OAuthMachineInput;
pub use oauth_machine::State as OAuthMachineState;
pub use oauth_machine::StateMachine as OAuthMachine;

const GOOGLE_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_REVOCATION_ENDPOINT: &str = "https://oauth2.googleapis.com/revoke";
const GOOGLE_USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const PKCE_VERIFIER_LEN: usize = 64;

/// Endpoints from an OpenID discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub revocation_endpoint: Option<Url>,
    pub userinfo_endpoint: Url,
}

impl DiscoveryDocument {
    /// Google's published endpoints.
    pub fn google() -> SessionResult<Self> {
        Ok(Self {
            authorization_endpoint: Url::parse(GOOGLE_AUTHORIZATION_ENDPOINT)?,
            token_endpoint: Url::parse(GOOGLE_TOKEN_ENDPOINT)?,
            revocation_endpoint: Some(Url::parse(GOOGLE_REVOCATION_ENDPOINT)?),
            userinfo_endpoint: Url::parse(GOOGLE_USERINFO_ENDPOINT)?,
        })
    }

    /// Fetch `{issuer}/.well-known/openid-configuration`.
    pub async fn fetch(http_client: &reqwest::Client, issuer: &Url) -> SessionResult<Self> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.as_str().trim_end_matches('/')
        );
        debug!(url = %url, "Fetching discovery document");

        let response = http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| SessionError::OAuthFailed(format!("Discovery request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(SessionError::OAuthFailed(format!(
                "Discovery returned HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SessionError::OAuthFailed(format!("Malformed discovery document: {}", e)))
    }
}

/// Where the bridge gets its endpoints.
#[derive(Debug, Clone)]
pub enum DiscoverySource {
    Fixed(DiscoveryDocument),
    Issuer(Url),
}

/// A PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PKCE_VERIFIER_LEN)
            .map(char::from)
            .collect();
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Result of a completed provider sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderGrant {
    pub access_token: String,
    pub user: UserProfile,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    #[serde(alias = "sub")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl UserInfo {
    /// Provider sign-in always yields a client.
    fn into_profile(self) -> SessionResult<UserProfile> {
        let email = self
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| SessionError::OAuthFailed("Provider profile has no email".into()))?;
        let username = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or(&email).to_string());

        Ok(UserProfile {
            id: self.id,
            username,
            email,
            role: RoleDescriptor::new(Role::Client),
        })
    }
}

/// Settles the machine if `sign_in` is dropped mid-flow.
struct FlowGuard<'a> {
    bridge: &'a OAuthBridge,
    settled: bool,
}

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.bridge.cancel();
        }
    }
}

/// Drives a single provider round trip at a time.
pub struct OAuthBridge {
    http_client: reqwest::Client,
    client_id: String,
    scopes: Vec<String>,
    source: DiscoverySource,
    discovery: tokio::sync::Mutex<Option<DiscoveryDocument>>,
    handoff: Arc<dyn BrowserHandoff>,
    fsm: Mutex<OAuthMachine>,
}

impl OAuthBridge {
    pub fn new(
        client_id: impl Into<String>,
        scopes: Vec<String>,
        source: DiscoverySource,
        handoff: Arc<dyn BrowserHandoff>,
    ) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            client_id: client_id.into(),
            scopes,
            source,
            discovery: tokio::sync::Mutex::new(None),
            handoff,
            fsm: Mutex::new(OAuthMachine::new()),
        }
    }

    /// Build from configuration. `Ok(None)` when no client id is configured.
    pub fn from_settings(
        settings: &OAuthSettings,
        handoff: Arc<dyn BrowserHandoff>,
    ) -> SessionResult<Option<Self>> {
        let Some(client_id) = settings.client_id.clone() else {
            return Ok(None);
        };
        let source = if settings.discover {
            DiscoverySource::Issuer(Url::parse(&settings.issuer)?)
        } else {
            DiscoverySource::Fixed(DiscoveryDocument::google()?)
        };
        Ok(Some(Self::new(
            client_id,
            settings.scopes.clone(),
            source,
            handoff,
        )))
    }

    pub fn state(&self) -> OAuthMachineState {
        self.lock_fsm().state().clone()
    }

    fn lock_fsm(&self) -> std::sync::MutexGuard<'_, OAuthMachine> {
        self.fsm.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, input: &OAuthMachineInput) -> SessionResult<()> {
        let mut fsm = self.lock_fsm();
        let old_state = fsm.state().clone();
        fsm.consume(input).map_err(|_| {
            SessionError::InvalidStateTransition(format!(
                "Cannot apply {:?} in provider state {:?}",
                input, old_state
            ))
        })?;
        debug!(old_state = ?old_state, new_state = ?fsm.state(), "Provider sign-in transition");
        Ok(())
    }

    async fn discovery(&self) -> SessionResult<DiscoveryDocument> {
        let mut cached = self.discovery.lock().await;
        if let Some(doc) = cached.as_ref() {
            return Ok(doc.clone());
        }
        let doc = match &self.source {
            DiscoverySource::Fixed(doc) => doc.clone(),
            DiscoverySource::Issuer(issuer) => {
                DiscoveryDocument::fetch(&self.http_client, issuer).await?
            }
        };
        *cached = Some(doc.clone());
        Ok(doc)
    }

    /// Build the consent-screen URL.
    pub fn authorization_url(
        &self,
        doc: &DiscoveryDocument,
        redirect_uri: &str,
        state: &str,
        pkce: &Pkce,
    ) -> Url {
        let mut url = doc.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");
        url
    }

    /// Run the whole flow.
    ///
    /// Returns `OAuthAbandoned` (and goes back to `Idle`) when the user walks
    /// away from the consent screen, `OAuthFailed` (and lands in `Failed`)
    /// when any step fails. Dropping the future part-way counts as
    /// abandonment while waiting on the browser and as failure afterwards.
    pub async fn sign_in(&self) -> SessionResult<ProviderGrant> {
        self.transition(&OAuthMachineInput::Start)?;

        let mut flow = FlowGuard {
            bridge: self,
            settled: false,
        };
        let result = self.run().await;
        flow.settled = true;

        match result {
            Ok(grant) => {
                self.transition(&OAuthMachineInput::ProfileReceived)?;
                info!(user_id = %grant.user.id, "Provider sign-in established");
                Ok(grant)
            }
            Err(SessionError::OAuthAbandoned) => {
                self.transition(&OAuthMachineInput::Abandoned)?;
                info!("Provider sign-in abandoned");
                Err(SessionError::OAuthAbandoned)
            }
            Err(e) => {
                let failed = if matches!(e, SessionError::OAuthFailed(_)) {
                    e
                } else {
                    SessionError::OAuthFailed(e.to_string())
                };
                warn!(error = %failed, state = ?self.state(), "Provider sign-in failed");
                self.transition(&OAuthMachineInput::Fail)?;
                Err(failed)
            }
        }
    }

    /// Settle a flow whose future was dropped before it finished.
    fn cancel(&self) {
        let input = match self.state() {
            OAuthMachineState::AwaitingProviderResponse => OAuthMachineInput::Abandoned,
            _ => OAuthMachineInput::Fail,
        };
        match self.transition(&input) {
            Ok(()) => info!(state = ?self.state(), "Provider sign-in cancelled"),
            Err(e) => warn!(error = %e, "Could not settle cancelled provider sign-in"),
        }
    }

    async fn run(&self) -> SessionResult<ProviderGrant> {
        let doc = self.discovery().await?;
        let pkce = Pkce::generate();
        let state = Uuid::new_v4().simple().to_string();
        let redirect_uri = self.handoff.redirect_uri();
        let url = self.authorization_url(&doc, &redirect_uri, &state, &pkce);

        let callback = self
            .handoff
            .authorize(&url)
            .await?
            .ok_or(SessionError::OAuthAbandoned)?;

        if callback.state.as_deref() != Some(state.as_str()) {
            return Err(SessionError::OAuthFailed(
                "State parameter mismatch".to_string(),
            ));
        }
        self.transition(&OAuthMachineInput::CodeReceived)?;

        let access_token = self
            .exchange_code(&doc, &callback.code, &redirect_uri, &pkce)
            .await?;
        self.transition(&OAuthMachineInput::TokenReceived)?;

        let user = self.fetch_profile(&doc, &access_token).await?;
        Ok(ProviderGrant { access_token, user })
    }

    async fn exchange_code(
        &self,
        doc: &DiscoveryDocument,
        code: &str,
        redirect_uri: &str,
        pkce: &Pkce,
    ) -> SessionResult<String> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
        ];

        let response = self
            .http_client
            .post(doc.token_endpoint.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| SessionError::OAuthFailed(format!("Token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SessionError::OAuthFailed(format!(
                "Token exchange returned HTTP {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SessionError::OAuthFailed(format!("Malformed token response: {}", e)))?;
        Ok(token.access_token)
    }

    async fn fetch_profile(
        &self,
        doc: &DiscoveryDocument,
        access_token: &str,
    ) -> SessionResult<UserProfile> {
        let response = self
            .http_client
            .get(doc.userinfo_endpoint.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| SessionError::OAuthFailed(format!("Profile request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SessionError::OAuthFailed(format!(
                "Profile request returned HTTP {}",
                response.status()
            )));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| SessionError::OAuthFailed(format!("Malformed profile: {}", e)))?;
        info.into_profile()
    }

    /// Revoke a provider token. Best-effort: failures are logged only.
    pub async fn revoke(&self, token: &str) {
        let doc = match self.discovery().await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "Skipping provider token revocation");
                return;
            }
        };
        let Some(endpoint) = doc.revocation_endpoint else {
            debug!("Provider has no revocation endpoint");
            return;
        };

        match self
            .http_client
            .post(endpoint)
            .form(&[("token", token)])
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!("Provider token revoked");
            }
            Ok(response) => {
                warn!(status = %response.status(), "Provider token revocation refused");
            }
            Err(e) => {
                warn!(error = %e, "Provider token revocation failed");
            }
        }
    }
}
