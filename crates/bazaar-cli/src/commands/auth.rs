//! Authentication commands.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use gatekeeper::{Registration, Role, Route, Session, SessionError};
use serde_json::json;
use std::io::{self, Write};

/// Sign in with an identifier and password.
pub async fn login(ctx: &Context, identifier: Option<String>, format: &OutputFormat) -> Result<()> {
    let current = restore_quietly(ctx).await;
    if current.is_authenticated {
        output::print_success(
            &format!("Already signed in as {}", display_name(&current)),
            format,
        );
        return Ok(());
    }

    let identifier = match identifier {
        Some(identifier) => identifier,
        None => prompt("Email or username: ")?,
    };
    if identifier.is_empty() {
        bail!("An email or username is required");
    }
    let password = rpassword::prompt_password("Password: ")?;

    let session = ctx
        .session
        .sign_in(&identifier, &password)
        .await
        .map_err(friendly)?;
    report_signed_in(ctx, &session, format);
    Ok(())
}

/// Create an account, then sign in with it.
pub async fn register(
    ctx: &Context,
    username: Option<String>,
    email: Option<String>,
    role: Role,
    format: &OutputFormat,
) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let email = match email {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;
    let confirm_password = rpassword::prompt_password("Confirm password: ")?;

    if password != confirm_password {
        bail!("Passwords do not match");
    }

    let registration = Registration {
        username,
        email,
        password,
        confirm_password,
        role,
    };
    let session = ctx
        .session
        .sign_up(&registration)
        .await
        .map_err(friendly)?;
    report_signed_in(ctx, &session, format);
    Ok(())
}

/// Sign in through the identity provider's consent screen.
pub async fn oauth(ctx: &Context, format: &OutputFormat) -> Result<()> {
    if !ctx.session.has_provider() {
        bail!("Provider sign-in is not configured. Set oauth.client_id in config.json or BAZAAR_OAUTH_CLIENT_ID");
    }

    restore_quietly(ctx).await;

    if matches!(format, OutputFormat::Text) {
        println!("Opening your browser to continue signing in...");
    }

    match ctx.session.sign_in_with_provider().await {
        Ok(session) => {
            report_signed_in(ctx, &session, format);
            Ok(())
        }
        Err(SessionError::OAuthAbandoned) => {
            output::print_success("Sign-in was cancelled", format);
            Ok(())
        }
        Err(e) => Err(friendly(e)),
    }
}

/// Sign out and clear the stored session.
pub async fn logout(ctx: &Context, format: &OutputFormat) -> Result<()> {
    ctx.session.sign_out().await.map_err(friendly)?;
    output::print_success("Signed out", format);
    Ok(())
}

/// Show the current session, checked against the server.
pub async fn status(ctx: &Context, format: &OutputFormat) -> Result<()> {
    let (session, problem) = match ctx.session.restore().await {
        Ok(session) => (session, None),
        Err(e) => (ctx.session.snapshot(), Some(e.user_message())),
    };
    let route = ctx.navigator.take();

    match format {
        OutputFormat::Json => output::print_json(&session_json(&session, route, problem.as_deref())),
        OutputFormat::Text => {
            println!("Session Status");
            println!();
            output::print_row("Server", &ctx.config.api_url);
            output::print_row("Data", &ctx.paths.base_dir().display().to_string());
            output::print_row("Signed in", if session.is_authenticated { "yes" } else { "no" });
            if let Some(user) = &session.user {
                output::print_row("Username", &user.username);
                output::print_row("Email", &user.email);
                output::print_row("Role", session.role.as_str());
            }
            if let Some(verified_at) = session.verified_at {
                output::print_row("Verified", &verified_at.to_rfc3339());
            }
            if let Some(route) = route {
                output::print_row("Home", route.path());
            }
            if let Some(problem) = problem {
                output::print_row("Problem", &problem);
            }
        }
    }
    Ok(())
}

/// Restore the stored session; failures are already reflected in the
/// snapshot, so they only get logged here.
async fn restore_quietly(ctx: &Context) -> Session {
    match ctx.session.restore().await {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!(error = %e, "Stored session not restored");
            ctx.session.snapshot()
        }
    }
}

fn report_signed_in(ctx: &Context, session: &Session, format: &OutputFormat) {
    let route = ctx.navigator.take();
    match format {
        OutputFormat::Json => output::print_json(&session_json(session, route, None)),
        OutputFormat::Text => {
            println!("Signed in as {}", display_name(session));
            if let Some(route) = route {
                output::print_row("Role", session.role.as_str());
                output::print_row("Next", route.path());
            }
        }
    }
}

fn session_json(session: &Session, route: Option<Route>, problem: Option<&str>) -> serde_json::Value {
    json!({
        "phase": session.phase,
        "authenticated": session.is_authenticated,
        "role": session.role,
        "user": session.user,
        "verifiedAt": session.verified_at,
        "route": route.map(|r| r.path()),
        "problem": problem,
    })
}

fn display_name(session: &Session) -> String {
    session
        .user
        .as_ref()
        .map(|user| format!("{} <{}>", user.username, user.email))
        .unwrap_or_else(|| "unknown user".to_string())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn friendly(error: SessionError) -> anyhow::Error {
    tracing::warn!(error = %error, "Session command failed");
    anyhow::anyhow!(error.user_message())
}
