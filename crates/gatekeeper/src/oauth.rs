//! OAuth callback server for browser-based provider sign-in.
//!
//! The provider redirects the browser to `http://localhost:{port}/callback`
//! with either `code` and `state`, or `error`. The server answers the first
//! callback request and hands its parameters back through a oneshot channel.

use crate::{SessionError, SessionResult};
use async_trait::async_trait;
use bazaar_config::{DEFAULT_OAUTH_CALLBACK_PORT, DEFAULT_OAUTH_TIMEOUT_SECS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// What the provider sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Consent granted; `state` must be checked by the caller.
    Authorized { code: String, state: Option<String> },
    /// The provider reported an error (`access_denied` when the user declined).
    Error(String),
    /// No callback arrived in time.
    TimedOut,
}

/// A successful authorization redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCallback {
    pub code: String,
    pub state: Option<String>,
}

type ResultSender = Arc<tokio::sync::Mutex<Option<oneshot::Sender<CallbackOutcome>>>>;

/// One-shot loopback HTTP server that waits for the authorization redirect.
pub struct OAuthCallbackServer {
    port: u16,
    timeout_secs: u64,
}

impl OAuthCallbackServer {
    pub fn new(port: u16, timeout_secs: u64) -> Self {
        Self { port, timeout_secs }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_OAUTH_CALLBACK_PORT, DEFAULT_OAUTH_TIMEOUT_SECS)
    }

    /// Redirect URI to register with the provider.
    pub fn callback_url(&self) -> String {
        format!("http://localhost:{}/callback", self.port)
    }

    /// Bind the listener and start serving.
    ///
    /// Binding happens before the browser is opened so the redirect can never
    /// arrive at a closed port.
    pub async fn listen(&self) -> SessionResult<PendingCallback> {
        let addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| SessionError::OAuthFailed(format!("Failed to bind to {}: {}", addr, e)))?;
        let port = listener.local_addr()?.port();

        info!(port, "OAuth callback server listening");

        let (tx, rx) = oneshot::channel::<CallbackOutcome>();
        let tx: ResultSender = Arc::new(tokio::sync::Mutex::new(Some(tx)));

        let server_handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((mut socket, _)) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&mut socket, tx).await {
                                error!("Error handling connection: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(PendingCallback {
            port,
            timeout: Duration::from_secs(self.timeout_secs),
            rx,
            server_handle,
        })
    }
}

/// A listening callback server.
pub struct PendingCallback {
    port: u16,
    timeout: Duration,
    rx: oneshot::Receiver<CallbackOutcome>,
    server_handle: JoinHandle<()>,
}

impl PendingCallback {
    /// The port actually bound (differs from the configured one when that was 0).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the redirect, then shut the server down.
    pub async fn wait(self) -> CallbackOutcome {
        let outcome = match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => CallbackOutcome::Error("Internal error: channel closed".to_string()),
            Err(_) => CallbackOutcome::TimedOut,
        };

        self.server_handle.abort();
        outcome
    }
}

async fn handle_connection(
    socket: &mut tokio::net::TcpStream,
    tx: ResultSender,
) -> SessionResult<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    debug!(request = %request_line.trim(), "Received callback request");

    // GET /callback?... HTTP/1.1
    let Some(rest) = request_line.strip_prefix("GET ") else {
        send_response(&mut writer, 405, "Method Not Allowed", "Method Not Allowed").await?;
        return Ok(());
    };
    let path = rest.split(" HTTP/").next().unwrap_or(rest).trim();

    let (route, query) = path.split_once('?').unwrap_or((path, ""));
    if route != "/callback" {
        send_response(&mut writer, 404, "Not Found", "Not Found").await?;
        return Ok(());
    }

    let outcome = parse_callback_query(query);
    let page = match &outcome {
        CallbackOutcome::Authorized { .. } => success_page(),
        CallbackOutcome::Error(err) => error_page(err),
        CallbackOutcome::TimedOut => error_page("timed out"),
    };
    send_response(&mut writer, 200, "OK", &page).await?;

    if let Some(tx) = tx.lock().await.take() {
        let _ = tx.send(outcome);
    }

    Ok(())
}

fn parse_callback_query(query: &str) -> CallbackOutcome {
    let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    if let Some(err) = params.get("error") {
        return CallbackOutcome::Error(err.clone());
    }

    match params.get("code").filter(|code| !code.is_empty()) {
        Some(code) => CallbackOutcome::Authorized {
            code: code.clone(),
            state: params.get("state").cloned(),
        },
        None => CallbackOutcome::Error("Missing required parameters".to_string()),
    }
}

async fn send_response(
    writer: &mut tokio::net::tcp::WriteHalf<'_>,
    status_code: u16,
    status_text: &str,
    body: &str,
) -> SessionResult<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>Bazaar - Signed In</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1>You're signed in</h1>
<p>You can close this window and return to Bazaar.</p>
<script>setTimeout(() => window.close(), 2000);</script>
</body>
</html>"#
        .to_string()
}

fn error_page(error: &str) -> String {
    let escaped = error
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Bazaar - Sign-in Failed</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1>Sign-in failed</h1>
<p>Error: {}</p>
<p>You can close this window and try again.</p>
</body>
</html>"#,
        escaped
    )
}

/// Hands the user to the provider's consent screen and waits for the result.
#[async_trait]
pub trait BrowserHandoff: Send + Sync {
    /// The redirect URI the provider must send the user back to.
    fn redirect_uri(&self) -> String;

    /// Show `authorization_url` and wait for the redirect.
    ///
    /// `Ok(None)` means the user abandoned the flow.
    async fn authorize(&self, authorization_url: &Url) -> SessionResult<Option<ProviderCallback>>;
}

/// Opens the system browser and catches the redirect on a loopback port.
pub struct LoopbackHandoff {
    server: OAuthCallbackServer,
}

impl LoopbackHandoff {
    pub fn new(port: u16, timeout_secs: u64) -> Self {
        Self {
            server: OAuthCallbackServer::new(port, timeout_secs),
        }
    }
}

#[async_trait]
impl BrowserHandoff for LoopbackHandoff {
    fn redirect_uri(&self) -> String {
        self.server.callback_url()
    }

    async fn authorize(&self, authorization_url: &Url) -> SessionResult<Option<ProviderCallback>> {
        let pending = self.server.listen().await?;

        if let Err(e) = open::that(authorization_url.as_str()) {
            warn!(error = %e, "Could not open browser");
        }
        info!(url = %authorization_url, "Waiting for provider sign-in in the browser");

        outcome_to_callback(pending.wait().await)
    }
}

fn outcome_to_callback(outcome: CallbackOutcome) -> SessionResult<Option<ProviderCallback>> {
    match outcome {
        CallbackOutcome::Authorized { code, state } => Ok(Some(ProviderCallback { code, state })),
        CallbackOutcome::TimedOut => {
            info!("Provider sign-in timed out");
            Ok(None)
        }
        CallbackOutcome::Error(err) if err == "access_denied" => {
            info!("Provider consent declined");
            Ok(None)
        }
        CallbackOutcome::Error(err) => Err(SessionError::OAuthFailed(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_url() {
        let server = OAuthCallbackServer::new(9876, 120);
        assert_eq!(server.callback_url(), "http://localhost:9876/callback");
        assert_eq!(
            OAuthCallbackServer::with_defaults().callback_url(),
            format!("http://localhost:{}/callback", DEFAULT_OAUTH_CALLBACK_PORT)
        );
    }

    #[test]
    fn test_parse_authorized() {
        assert_eq!(
            parse_callback_query("code=4%2F0Ab&state=xyz&scope=openid+email"),
            CallbackOutcome::Authorized {
                code: "4/0Ab".to_string(),
                state: Some("xyz".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_error_wins_over_code() {
        assert_eq!(
            parse_callback_query("error=access_denied&code=abc"),
            CallbackOutcome::Error("access_denied".to_string())
        );
    }

    #[test]
    fn test_parse_missing_code() {
        assert_eq!(
            parse_callback_query("state=xyz"),
            CallbackOutcome::Error("Missing required parameters".to_string())
        );
        assert!(matches!(parse_callback_query("code="), CallbackOutcome::Error(_)));
    }

    #[test]
    fn test_denied_and_timeout_are_abandonment() {
        assert_eq!(
            outcome_to_callback(CallbackOutcome::Error("access_denied".into())).unwrap(),
            None
        );
        assert_eq!(outcome_to_callback(CallbackOutcome::TimedOut).unwrap(), None);
        assert!(matches!(
            outcome_to_callback(CallbackOutcome::Error("server_error".into())),
            Err(SessionError::OAuthFailed(_))
        ));
    }

    #[test]
    fn test_error_page_escapes_html() {
        let page = error_page("<script>");
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }

    #[tokio::test]
    async fn test_server_receives_callback() {
        let pending = OAuthCallbackServer::new(0, 5).listen().await.unwrap();
        let url = format!(
            "http://127.0.0.1:{}/callback?code=abc&state=s1",
            pending.port()
        );

        let response = reqwest::get(&url).await.unwrap();
        assert!(response.status().is_success());

        assert_eq!(
            pending.wait().await,
            CallbackOutcome::Authorized {
                code: "abc".to_string(),
                state: Some("s1".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_server_ignores_other_paths() {
        let pending = OAuthCallbackServer::new(0, 1).listen().await.unwrap();
        let url = format!("http://127.0.0.1:{}/favicon.ico", pending.port());

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status().as_u16(), 404);
        assert_eq!(pending.wait().await, CallbackOutcome::TimedOut);
    }
}
