//! Browser sessions: one isolated context and page per scenario.

use crate::driver::{BrowserBackend, NavigationOutcome, PageDriver};
use crate::fixture::AuthFixture;
use crate::result::{VergerError, VergerResult};
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An authenticated (or anonymous) browser context plus its page
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    identity: Option<AuthFixture>,
    driver: Box<dyn PageDriver>,
    base_url: reqwest::Url,
    nav_timeout: Duration,
    closed: bool,
}

impl Session {
    /// Open an anonymous session in a fresh context
    ///
    /// # Errors
    ///
    /// Returns `Config` for an unusable base URL, or the backend's error when
    /// the context cannot be created
    pub async fn open(
        backend: &dyn BrowserBackend,
        base_url: &str,
        nav_timeout: Duration,
    ) -> VergerResult<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| VergerError::config(format!("invalid base_url {base_url:?}: {e}")))?;
        let driver = backend.new_context().await?;
        let session = Self {
            id: Uuid::new_v4(),
            identity: None,
            driver,
            base_url,
            nav_timeout,
            closed: false,
        };
        debug!(session = %session.id, backend = backend.name(), "session opened");
        Ok(session)
    }

    /// Unique id, used in logs
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Role this session authenticated as
    #[must_use]
    pub fn role(&self) -> Option<&str> {
        self.identity.as_ref().map(|f| f.role.as_str())
    }

    /// Injected auth fixture, if any
    #[must_use]
    pub const fn identity(&self) -> Option<&AuthFixture> {
        self.identity.as_ref()
    }

    pub(crate) fn set_identity(&mut self, fixture: AuthFixture) {
        self.identity = Some(fixture);
    }

    /// Base URL relative targets resolve against
    #[must_use]
    pub const fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }

    /// The page driver
    #[must_use]
    pub fn driver(&self) -> &dyn PageDriver {
        self.driver.as_ref()
    }

    /// Whether [`Session::close`] already ran
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Resolve `target` against the base URL; absolute URLs pass through
    ///
    /// # Errors
    ///
    /// Returns `Config` if the result is not a valid URL
    pub fn resolve(&self, target: &str) -> VergerResult<String> {
        self.base_url
            .join(target)
            .map(String::from)
            .map_err(|e| VergerError::config(format!("cannot resolve {target:?}: {e}")))
    }

    /// Navigate within the navigation timeout.
    ///
    /// Redirects are followed and reported in the outcome; landing somewhere
    /// other than `target` is not an error.
    ///
    /// # Errors
    ///
    /// Returns `NavigationError` classifying DNS, connection, HTTP status and
    /// timeout failures
    pub async fn navigate(&self, target: &str) -> VergerResult<NavigationOutcome> {
        if self.closed {
            return Err(VergerError::page("session is closed"));
        }
        let url = self.resolve(target)?;
        let outcome = self.driver.navigate(&url, self.nav_timeout).await?;
        if outcome.url == url {
            debug!(session = %self.id, %url, "navigated");
        } else {
            info!(session = %self.id, %url, landed = %outcome.url, "navigation redirected");
        }
        Ok(outcome)
    }

    /// Dispose of the context. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns the driver's error if the context could not be disposed
    pub async fn close(&mut self) -> VergerResult<()> {
        if self.closed {
            return Ok(());
        }
        self.driver.close().await?;
        self.closed = true;
        debug!(session = %self.id, "session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            warn!(session = %self.id, "session dropped without close");
        }
    }
}

/// Run `f` with the session, then close it whatever `f` returned.
///
/// A close failure is logged; the operation's own result is what the caller
/// sees.
pub async fn with_session<T, F>(mut session: Session, f: F) -> VergerResult<T>
where
    F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, VergerResult<T>>,
{
    let result = f(&mut session).await;
    if let Err(e) = session.close().await {
        warn!(session = %session.id, error = %e, "failed to close session");
    }
    result
}
