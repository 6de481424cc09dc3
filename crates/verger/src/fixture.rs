//! Authentication fixtures.
//!
//! A fixture maps a role name to a token the target application accepts and
//! injects it into a fresh context, skipping the interactive login form.
//! Two injection points exist because applications disagree on where the
//! session lives:
//!
//! - **Cookie**: `demo_token=<token>` (plus the provider cookie) is set
//!   before the first navigation.
//! - **Storage**: the origin is visited once, `localStorage.session` is set
//!   to `{"token": ..., "provider": ...}`, then the landing route is loaded.

use crate::config::{AuthConfig, HarnessConfig, InjectionMode};
use crate::driver::{BrowserBackend, Cookie};
use crate::result::{VergerError, VergerResult};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Resolved credentials for one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFixture {
    /// Role name
    pub role: String,
    /// Opaque token
    pub token: String,
    /// Auth provider recorded with the token
    pub provider: String,
    /// Where the token is injected
    pub mode: InjectionMode,
}

/// Creates sessions with auth state already in place
#[derive(Debug, Clone)]
pub struct FixtureProvider {
    auth: AuthConfig,
    base_url: String,
    nav_timeout: Duration,
}

impl FixtureProvider {
    /// Create a provider
    #[must_use]
    pub fn new(auth: AuthConfig, base_url: impl Into<String>, nav_timeout: Duration) -> Self {
        Self {
            auth,
            base_url: base_url.into(),
            nav_timeout,
        }
    }

    /// Provider for a harness configuration
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            config.auth.clone(),
            config.base_url.clone(),
            config.timeouts.navigation(),
        )
    }

    /// Known role names, sorted
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.auth.roles.keys().map(String::as_str)
    }

    /// Look up the fixture for `role`
    ///
    /// # Errors
    ///
    /// Returns `UnknownRole` if the role has no token
    pub fn fixture_for(&self, role: &str) -> VergerResult<AuthFixture> {
        let entry = self
            .auth
            .roles
            .get(role)
            .ok_or_else(|| VergerError::UnknownRole {
                role: role.to_string(),
            })?;
        Ok(AuthFixture {
            role: role.to_string(),
            token: entry.token.clone(),
            provider: self.auth.provider.clone(),
            mode: entry.mode.unwrap_or(self.auth.default_mode),
        })
    }

    /// Open a session authenticated as `role`.
    ///
    /// The role is resolved before any browser context exists, so an unknown
    /// role leaves nothing to clean up.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRole`, or the error from opening the context or
    /// injecting the token (the context is closed in that case)
    pub async fn create_authenticated_context(
        &self,
        backend: &dyn BrowserBackend,
        role: &str,
    ) -> VergerResult<Session> {
        let fixture = self.fixture_for(role)?;
        let mut session = Session::open(backend, &self.base_url, self.nav_timeout).await?;
        if let Err(e) = self.inject(&session, &fixture).await {
            if let Err(close_err) = session.close().await {
                warn!(error = %close_err, "failed to close session after injection error");
            }
            return Err(e);
        }
        session.set_identity(fixture);
        Ok(session)
    }

    /// Open a session for an optional role; `None` stays anonymous
    ///
    /// # Errors
    ///
    /// See [`FixtureProvider::create_authenticated_context`]
    pub async fn create_context(
        &self,
        backend: &dyn BrowserBackend,
        role: Option<&str>,
    ) -> VergerResult<Session> {
        match role {
            Some(role) => self.create_authenticated_context(backend, role).await,
            None => Session::open(backend, &self.base_url, self.nav_timeout).await,
        }
    }

    async fn inject(&self, session: &Session, fixture: &AuthFixture) -> VergerResult<()> {
        debug!(role = %fixture.role, mode = ?fixture.mode, "injecting auth fixture");
        match fixture.mode {
            InjectionMode::Cookie => {
                let origin = session.resolve("/")?;
                let mut cookies = vec![Cookie::new(
                    self.auth.cookie_name.clone(),
                    fixture.token.clone(),
                    origin.clone(),
                )];
                if let Some(name) = &self.auth.provider_cookie {
                    cookies.push(Cookie::new(name.clone(), fixture.provider.clone(), origin));
                }
                session.driver().set_cookies(&cookies).await
            }
            InjectionMode::Storage => {
                session.navigate("/").await?;
                let value = serde_json::json!({
                    "token": fixture.token,
                    "provider": fixture.provider,
                });
                session
                    .driver()
                    .set_local_storage(&self.auth.storage_key, &value.to_string())
                    .await?;
                session.navigate(&self.auth.landing_route).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RoleConfig;
    use crate::driver::{MockApp, MockBackend, MockElement, MockPage};

    const ORIGIN: &str = "http://localhost:3000";

    fn backend() -> MockBackend {
        let mut app = MockApp::new(ORIGIN)
            .route(
                "/dashboard",
                MockPage::protected().with(MockElement::heading("h", "Dashboard")),
            )
            .route("/settings", MockPage::protected());
        for token in ["demo-admin", "demo-leader", "demo-member", "demo-volunteer"] {
            app = app.accept_token(token);
        }
        MockBackend::new(app)
    }

    fn provider(auth: AuthConfig) -> FixtureProvider {
        FixtureProvider::new(auth, ORIGIN, Duration::from_secs(1))
    }

    mod lookup_tests {
        use super::*;

        #[test]
        fn test_fixture_for_known_role() {
            let fixture = provider(AuthConfig::default()).fixture_for("volunteer").unwrap();
            assert_eq!(fixture.token, "demo-volunteer");
            assert_eq!(fixture.provider, "demo");
            assert_eq!(fixture.mode, InjectionMode::Cookie);
        }

        #[test]
        fn test_role_mode_override() {
            let auth = AuthConfig::default().with_role(
                "volunteer",
                RoleConfig::token("demo-volunteer").with_mode(InjectionMode::Storage),
            );
            let fixture = provider(auth).fixture_for("volunteer").unwrap();
            assert_eq!(fixture.mode, InjectionMode::Storage);
        }

        #[test]
        fn test_roles_listed() {
            let p = provider(AuthConfig::default());
            let roles: Vec<&str> = p.roles().collect();
            assert_eq!(roles, ["admin", "demo", "leader", "member", "volunteer"]);
        }
    }

    mod injection_tests {
        use super::*;

        async fn lands_on_protected(p: &FixtureProvider, backend: &MockBackend, role: &str) {
            let mut session = p.create_authenticated_context(backend, role).await.unwrap();
            assert_eq!(session.role(), Some(role));
            let outcome = session.navigate("/settings").await.unwrap();
            assert!(
                !outcome.url.ends_with("/login"),
                "{role} was redirected to login"
            );
            session.close().await.unwrap();
        }

        #[tokio::test]
        async fn test_every_role_in_cookie_mode() {
            let backend = backend();
            let p = provider(AuthConfig::default());
            let roles: Vec<String> = p.roles().map(String::from).collect();
            for role in &roles {
                lands_on_protected(&p, &backend, role).await;
            }
            assert_eq!(backend.app().open_contexts(), 0);
        }

        #[tokio::test]
        async fn test_every_role_in_storage_mode() {
            let backend = backend();
            let p = provider(AuthConfig::default().with_default_mode(InjectionMode::Storage));
            let roles: Vec<String> = p.roles().map(String::from).collect();
            for role in &roles {
                lands_on_protected(&p, &backend, role).await;
            }
        }

        #[tokio::test]
        async fn test_cookie_mode_sets_provider_cookie_before_navigation() {
            let backend = backend();
            let p = provider(AuthConfig::default());
            let mut session = p.create_authenticated_context(&backend, "admin").await.unwrap();
            let calls = backend.app().calls();
            assert!(calls.iter().any(|c| c.ends_with("set_cookie demo_token=demo-admin")));
            assert!(calls.iter().any(|c| c.ends_with("set_cookie session_provider=demo")));
            assert!(!calls.iter().any(|c| c.contains("navigate")));
            session.close().await.unwrap();
        }

        #[tokio::test]
        async fn test_storage_mode_visits_origin_then_landing_route() {
            let backend = backend();
            let p = provider(AuthConfig::default().with_default_mode(InjectionMode::Storage));
            let mut session = p.create_authenticated_context(&backend, "volunteer").await.unwrap();
            let calls: Vec<String> = backend
                .app()
                .calls()
                .into_iter()
                .map(|c| c.split_once(':').map(|(_, call)| call.to_string()).unwrap())
                .collect();
            assert_eq!(
                calls,
                [
                    "navigate http://localhost:3000/",
                    "set_local_storage session",
                    "navigate http://localhost:3000/dashboard",
                ]
            );
            session.close().await.unwrap();
        }

        #[tokio::test]
        async fn test_unknown_role_creates_no_context() {
            let backend = backend();
            let err = provider(AuthConfig::default())
                .create_authenticated_context(&backend, "bishop")
                .await
                .unwrap_err();
            assert!(matches!(err, VergerError::UnknownRole { ref role } if role == "bishop"));
            assert_eq!(backend.app().contexts_opened(), 0);
        }

        #[tokio::test]
        async fn test_failed_injection_closes_context() {
            let app = MockApp::new(ORIGIN).status("/", 503);
            let backend = MockBackend::new(app);
            let p = provider(AuthConfig::default().with_default_mode(InjectionMode::Storage));
            let err = p.create_authenticated_context(&backend, "admin").await.unwrap_err();
            assert_eq!(err.kind(), crate::result::ErrorKind::Navigation);
            assert_eq!(backend.app().contexts_opened(), 1);
            assert_eq!(backend.app().open_contexts(), 0);
        }

        #[tokio::test]
        async fn test_anonymous_context() {
            let backend = backend();
            let mut session = provider(AuthConfig::default())
                .create_context(&backend, None)
                .await
                .unwrap();
            assert!(session.identity().is_none());
            let outcome = session.navigate("/dashboard").await.unwrap();
            assert!(outcome.url.ends_with("/login"));
            session.close().await.unwrap();
        }
    }
}
