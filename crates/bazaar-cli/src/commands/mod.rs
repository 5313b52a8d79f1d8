//! CLI command implementations.

pub mod auth;

use anyhow::{Context as _, Result};
use bazaar_config::{init_logging_with_path, Config, Paths};
use gatekeeper::{Navigator, Role, Route, RoleRouter, SessionHandle, SessionRuntime};
use std::sync::{Arc, Mutex};

/// Everything a command needs: the loaded config and a session handle.
pub struct Context {
    pub config: Config,
    pub paths: Paths,
    pub session: SessionHandle,
    pub navigator: Arc<ConsoleNavigator>,
    _runtime: SessionRuntime,
}

impl Context {
    pub fn load(log_level: Option<&str>) -> Result<Self> {
        let paths = Paths::new().context("could not resolve the home directory")?;
        let config = Config::load(&paths).context("could not load configuration")?;

        let level = log_level.unwrap_or(&config.log_level);
        init_logging_with_path(level, Some(&paths.log_file()), false);

        let navigator = Arc::new(ConsoleNavigator::default());
        let runtime = SessionRuntime::from_config(&config, &paths, navigator.clone())
            .map_err(|e| anyhow::anyhow!(e.user_message()))?;
        let session = runtime.handle();
        // A terminal has no router to wait for.
        session.mark_navigation_ready();

        Ok(Self {
            config,
            paths,
            session,
            navigator,
            _runtime: runtime,
        })
    }
}

/// Remembers where the session wanted to send the user so commands can
/// report it.
#[derive(Default)]
pub struct ConsoleNavigator {
    last: Mutex<Option<Route>>,
}

impl ConsoleNavigator {
    pub fn take(&self) -> Option<Route> {
        self.last.lock().ok().and_then(|mut last| last.take())
    }

    fn record(&self, route: Route) {
        tracing::debug!(route = %route, "Navigation requested");
        if let Ok(mut last) = self.last.lock() {
            *last = Some(route);
        }
    }
}

impl Navigator for ConsoleNavigator {
    fn redirect(&self, role: Role) {
        self.record(RoleRouter::decide(role, true));
    }

    fn redirect_incomplete(&self, role: Role) {
        self.record(RoleRouter::decide(role, false));
    }

    fn redirect_to_sign_in(&self) {
        self.record(Route::SignIn);
    }
}
