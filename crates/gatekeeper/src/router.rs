//! Post-validation routing.
//!
//! `RoleRouter::decide` is a pure function from `(role, profile_complete)` to
//! exactly one destination. Issuing the navigation command is the
//! `Navigator`'s job; the session manager guarantees it happens once per
//! established session.

use async_trait::async_trait;
use bazaar_storage::{Role, UserProfile};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A navigation destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "role", rename_all = "snake_case")]
pub enum Route {
    /// The role's home screen.
    Home(Role),
    /// The role's onboarding screen.
    CompleteProfile(Role),
    /// The unauthenticated entry screen.
    SignIn,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Home(Role::Client) => "/client",
            Route::Home(Role::Freelancer) => "/freelancer",
            Route::Home(Role::Company) => "/company",
            Route::Home(Role::Admin) => "/admin",
            Route::CompleteProfile(Role::Freelancer) => "/freelancer/complete-profile",
            Route::CompleteProfile(Role::Company) => "/company/complete-profile",
            // Never produced by `decide`; roles without onboarding go home.
            Route::CompleteProfile(Role::Client) => "/client",
            Route::CompleteProfile(Role::Admin) => "/admin",
            Route::SignIn => "/sign-in",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Outbound navigation collaborator. Fire-and-forget.
pub trait Navigator: Send + Sync {
    fn redirect(&self, role: Role);

    fn redirect_incomplete(&self, role: Role);

    /// Send the user back to the unauthenticated entry screen.
    fn redirect_to_sign_in(&self) {}
}

/// Answers whether a role-specific onboarding step has been finished.
#[async_trait]
pub trait ProfileProbe: Send + Sync {
    async fn is_complete(&self, role: Role, user: Option<&UserProfile>) -> bool;
}

/// Probe that treats every profile as complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeComplete;

#[async_trait]
impl ProfileProbe for AssumeComplete {
    async fn is_complete(&self, _role: Role, _user: Option<&UserProfile>) -> bool {
        true
    }
}

pub struct RoleRouter;

impl RoleRouter {
    pub fn decide(role: Role, profile_complete: bool) -> Route {
        if role.requires_profile() && !profile_complete {
            Route::CompleteProfile(role)
        } else {
            Route::Home(role)
        }
    }

    /// Decide from an untrusted role name; unknown names go to sign-in.
    pub fn decide_raw(role: &str, profile_complete: bool) -> Route {
        match Role::parse(role) {
            Some(role) => Self::decide(role, profile_complete),
            None => Route::SignIn,
        }
    }

    /// Issue `route` through `navigator`.
    pub fn dispatch(navigator: &dyn Navigator, route: Route) {
        match route {
            Route::Home(role) => navigator.redirect(role),
            Route::CompleteProfile(role) => navigator.redirect_incomplete(role),
            Route::SignIn => navigator.redirect_to_sign_in(),
        }
    }
}
