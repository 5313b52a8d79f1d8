//! Remote session authority: the marketplace API's login, registration and
//! token verification endpoints.
//!
//! Responses are validated here. Anything that does not match the expected
//! shape fails closed as `RemoteRejected`, so the session manager never sees
//! a loosely-typed payload.

use crate::{SessionError, SessionResult};
use async_trait::async_trait;
use bazaar_storage::{Role, UserProfile};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

/// Token and profile issued by a successful login or registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub token: String,
    pub user: UserProfile,
}

impl AuthGrant {
    pub fn role(&self) -> Role {
        self.user.role()
    }
}

/// A new account request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub role: Role,
}

/// The remote boundary the session manager depends on.
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    async fn login(&self, identifier: &str, secret: &str) -> SessionResult<AuthGrant>;

    async fn register(&self, registration: &Registration) -> SessionResult<AuthGrant>;

    /// `Ok(false)` when the authority answers that the token is not valid.
    async fn verify_token(&self, token: &str) -> SessionResult<bool>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct GrantResponse {
    #[serde(alias = "jwt")]
    token: String,
    user: UserProfile,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
}

/// HTTP implementation against the marketplace API.
#[derive(Clone)]
pub struct HttpSessionAuthority {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpSessionAuthority {
    pub fn new(base_url: Url) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http_client: reqwest::Client, mut base_url: Url) -> Self {
        // `Url::join` replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            http_client,
            base_url,
        }
    }

    fn endpoint(&self, name: &str) -> SessionResult<Url> {
        Ok(self.base_url.join(name)?)
    }

    async fn post_for_grant<B: Serialize + ?Sized>(
        &self,
        name: &str,
        body: &B,
    ) -> SessionResult<AuthGrant> {
        let url = self.endpoint(name)?;
        debug!(url = %url, "Calling session authority");

        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let body = read_success_body(response, name).await?;
        parse_grant(&body)
    }
}

#[async_trait]
impl SessionAuthority for HttpSessionAuthority {
    async fn login(&self, identifier: &str, secret: &str) -> SessionResult<AuthGrant> {
        self.post_for_grant(
            "login",
            &LoginRequest {
                identifier,
                password: secret,
            },
        )
        .await
    }

    async fn register(&self, registration: &Registration) -> SessionResult<AuthGrant> {
        self.post_for_grant("register", registration).await
    }

    async fn verify_token(&self, token: &str) -> SessionResult<bool> {
        let url = self.endpoint("verify-token")?;
        debug!(url = %url, "Verifying token with session authority");

        let response = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        let body = read_success_body(response, "verify-token").await?;
        let verdict: VerifyResponse = serde_json::from_str(&body).map_err(|e| {
            SessionError::RemoteRejected(format!("Malformed verify-token response: {}", e))
        })?;
        Ok(verdict.valid)
    }
}

fn transport_error(e: reqwest::Error) -> SessionError {
    SessionError::RemoteUnreachable(e.to_string())
}

async fn read_success_body(response: reqwest::Response, name: &str) -> SessionResult<String> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        warn!(endpoint = name, status = %status, "Session authority refused request");
        return Err(SessionError::RemoteRejected(format!(
            "{} returned HTTP {}",
            name, status
        )));
    }

    Ok(body)
}

fn parse_grant(body: &str) -> SessionResult<AuthGrant> {
    let grant: GrantResponse = serde_json::from_str(body)
        .map_err(|e| SessionError::RemoteRejected(format!("Malformed auth response: {}", e)))?;

    if grant.token.trim().is_empty() {
        return Err(SessionError::RemoteRejected(
            "Auth response carried an empty token".to_string(),
        ));
    }

    Ok(AuthGrant {
        token: grant.token,
        user: grant.user,
    })
}
