//! Browser control for headless testing.
//!
//! With the `browser` feature, [`ChromiumBackend`] drives a real Chromium
//! through the Chrome `DevTools` Protocol (chromiumoxide). Each session gets
//! its own CDP browser context, so cookies and storage never leak between
//! concurrently running scenarios while they share one browser process.

use crate::driver::BrowserBackend;
use crate::result::VergerResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Browser configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            chromium_path: None,
            sandbox: true,
        }
    }
}

impl BrowserConfig {
    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

/// Launch the browser backend this build supports
///
/// # Errors
///
/// Returns `BrowserLaunchError` if the browser cannot start, or if the crate
/// was built without the `browser` feature
pub async fn launch(config: &BrowserConfig) -> VergerResult<Arc<dyn BrowserBackend>> {
    #[cfg(feature = "browser")]
    {
        let backend = ChromiumBackend::launch(config.clone()).await?;
        Ok(Arc::new(backend))
    }
    #[cfg(not(feature = "browser"))]
    {
        let _ = config;
        Err(crate::result::VergerError::BrowserLaunchError {
            message: "built without the `browser` feature".to_string(),
        })
    }
}

#[cfg(feature = "browser")]
pub use cdp::{ChromiumBackend, ChromiumPage};

/// Log how the browser process ended; true if it was reaped
#[cfg(any(feature = "browser", test))]
fn note_browser_exit(waited: std::io::Result<Option<std::process::ExitStatus>>) -> bool {
    match waited {
        Ok(status) => {
            tracing::debug!(?status, "browser process exited");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "browser process did not exit cleanly");
            false
        }
    }
}

// ============================================================================
// Real CDP Implementation (when `browser` feature is enabled)
// ============================================================================

#[cfg(feature = "browser")]
#[allow(
    clippy::wildcard_imports,
    clippy::significant_drop_tightening,
    clippy::missing_errors_doc
)]
mod cdp {
    use super::*;
    use crate::driver::{
        CaptureArea, Cookie, ElementProbe, NavigationOutcome, NetworkActivity, PageDriver,
    };
    use crate::locator::Selector;
    use crate::result::{NavigationFailure, VergerError};
    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
    use chromiumoxide::cdp::browser_protocol::network::CookieParam;
    use chromiumoxide::cdp::browser_protocol::page::{
        CaptureScreenshotFormat, CaptureScreenshotParams, Viewport,
    };
    use chromiumoxide::cdp::browser_protocol::target::{
        CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
    };
    use chromiumoxide::page::Page as CdpPage;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tracing::{debug, warn};

    const NAVIGATION_STATUS: &str = "(() => { const nav = performance.getEntriesByType('navigation')[0]; \
         return nav && nav.responseStatus ? nav.responseStatus : null; })()";

    const NETWORK_ACTIVITY: &str = "(() => { const r = performance.getEntriesByType('resource'); \
         const last = r.reduce((m, e) => Math.max(m, e.responseEnd), 0); \
         return { resource_count: r.length, ready_state_complete: document.readyState === 'complete', \
         quiet_ms: Math.max(0, Math.floor(performance.now() - last)) }; })()";

    const PAGE_SIZE: &str = "({ width: Math.max(document.documentElement.scrollWidth, window.innerWidth), \
         height: Math.max(document.documentElement.scrollHeight, window.innerHeight) })";

    fn page_error(e: impl std::fmt::Display) -> VergerError {
        VergerError::page(e.to_string())
    }

    /// Browser instance with real CDP connection
    #[derive(Debug)]
    pub struct ChromiumBackend {
        inner: Arc<Mutex<CdpBrowser>>,
        contexts: Arc<Mutex<Vec<BrowserContextId>>>,
        handle: tokio::task::JoinHandle<()>,
    }

    impl ChromiumBackend {
        /// Launch a new browser instance with real CDP
        pub async fn launch(config: BrowserConfig) -> VergerResult<Self> {
            let mut builder = CdpConfig::builder()
                .window_size(config.viewport_width, config.viewport_height);

            if !config.headless {
                builder = builder.with_head();
            }

            if !config.sandbox {
                builder = builder.no_sandbox();
            }

            if let Some(ref path) = config.chromium_path {
                builder = builder.chrome_executable(path);
            }

            let cdp_config = builder
                .build()
                .map_err(|e| VergerError::BrowserLaunchError { message: e })?;

            let (browser, mut handler) = CdpBrowser::launch(cdp_config).await.map_err(|e| {
                VergerError::BrowserLaunchError {
                    message: e.to_string(),
                }
            })?;

            // Spawn handler task
            let handle = tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });

            Ok(Self {
                inner: Arc::new(Mutex::new(browser)),
                contexts: Arc::new(Mutex::new(Vec::new())),
                handle,
            })
        }
    }

    #[async_trait]
    impl BrowserBackend for ChromiumBackend {
        fn name(&self) -> &'static str {
            "chromium"
        }

        async fn new_context(&self) -> VergerResult<Box<dyn PageDriver>> {
            let browser = self.inner.lock().await;
            let context_id = browser
                .execute(CreateBrowserContextParams::default())
                .await
                .map_err(page_error)?
                .result
                .browser_context_id;
            let target = CreateTargetParams::builder()
                .url("about:blank")
                .browser_context_id(context_id.clone())
                .build()
                .map_err(VergerError::page)?;
            let page = browser.new_page(target).await.map_err(page_error)?;
            drop(browser);

            self.contexts.lock().await.push(context_id.clone());
            debug!(context = ?context_id, "opened browser context");

            Ok(Box::new(ChromiumPage {
                browser: Arc::clone(&self.inner),
                contexts: Arc::clone(&self.contexts),
                context_id,
                page: Some(page),
            }))
        }

        async fn shutdown(&self) -> VergerResult<()> {
            let leftover: Vec<BrowserContextId> = self.contexts.lock().await.drain(..).collect();
            let mut browser = self.inner.lock().await;
            for id in leftover {
                if let Err(e) = browser.execute(DisposeBrowserContextParams::new(id)).await {
                    warn!(error = %e, "failed to dispose browser context");
                }
            }
            let closed = browser
                .close()
                .await
                .map(|_| ())
                .map_err(|e| VergerError::BrowserLaunchError {
                    message: e.to_string(),
                });
            note_browser_exit(browser.wait().await);
            self.handle.abort();
            closed
        }
    }

    /// A browser page inside its own CDP browser context
    #[derive(Debug)]
    pub struct ChromiumPage {
        browser: Arc<Mutex<CdpBrowser>>,
        contexts: Arc<Mutex<Vec<BrowserContextId>>>,
        context_id: BrowserContextId,
        page: Option<CdpPage>,
    }

    impl ChromiumPage {
        fn page(&self) -> VergerResult<&CdpPage> {
            self.page
                .as_ref()
                .ok_or_else(|| VergerError::page("context is closed"))
        }

        async fn eval_value(&self, script: &str) -> VergerResult<serde_json::Value> {
            let result = self.page()?.evaluate(script).await.map_err(page_error)?;
            Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
        }

        async fn eval_bool(&self, script: &str) -> VergerResult<bool> {
            Ok(self.eval_value(script).await?.as_bool().unwrap_or(false))
        }
    }

    #[async_trait]
    impl PageDriver for ChromiumPage {
        async fn navigate(
            &self,
            url: &str,
            timeout: Duration,
        ) -> VergerResult<NavigationOutcome> {
            let page = self.page()?;
            match tokio::time::timeout(timeout, page.goto(url)).await {
                Err(_) => {
                    return Err(VergerError::NavigationError {
                        url: url.to_string(),
                        failure: NavigationFailure::Timeout,
                    })
                }
                Ok(Err(e)) => {
                    return Err(VergerError::NavigationError {
                        url: url.to_string(),
                        failure: NavigationFailure::from_net_error(&e.to_string()),
                    })
                }
                Ok(Ok(_)) => {}
            }

            let status = self
                .eval_value(NAVIGATION_STATUS)
                .await?
                .as_u64()
                .and_then(|s| u16::try_from(s).ok());
            if let Some(code) = status.filter(|s| *s >= 400) {
                return Err(VergerError::NavigationError {
                    url: url.to_string(),
                    failure: NavigationFailure::HttpStatus(code),
                });
            }
            Ok(NavigationOutcome {
                url: self.current_url().await?,
                status,
            })
        }

        async fn current_url(&self) -> VergerResult<String> {
            Ok(self
                .page()?
                .url()
                .await
                .map_err(page_error)?
                .unwrap_or_else(|| "about:blank".to_string()))
        }

        async fn probe(&self, selector: &Selector) -> VergerResult<ElementProbe> {
            let value = self.eval_value(&selector.probe_script()).await?;
            Ok(serde_json::from_value(value)?)
        }

        async fn click(&self, selector: &Selector) -> VergerResult<bool> {
            self.eval_bool(&selector.click_script()).await
        }

        async fn fill(&self, selector: &Selector, value: &str) -> VergerResult<bool> {
            self.eval_bool(&selector.fill_script(value)).await
        }

        async fn evaluate(&self, script: &str) -> VergerResult<serde_json::Value> {
            self.eval_value(script).await
        }

        async fn set_cookies(&self, cookies: &[Cookie]) -> VergerResult<()> {
            let params = cookies
                .iter()
                .map(|c| {
                    CookieParam::builder()
                        .name(c.name.clone())
                        .value(c.value.clone())
                        .url(c.url.clone())
                        .build()
                        .map_err(VergerError::page)
                })
                .collect::<VergerResult<Vec<_>>>()?;
            self.page()?.set_cookies(params).await.map_err(page_error)?;
            Ok(())
        }

        async fn set_local_storage(&self, key: &str, value: &str) -> VergerResult<()> {
            let script = format!(
                "localStorage.setItem({}, {})",
                crate::locator::js_string(key),
                crate::locator::js_string(value)
            );
            self.eval_value(&script).await.map(|_| ())
        }

        async fn network_activity(&self) -> VergerResult<NetworkActivity> {
            Ok(serde_json::from_value(self.eval_value(NETWORK_ACTIVITY).await?)?)
        }

        async fn screenshot(&self, area: CaptureArea) -> VergerResult<Vec<u8>> {
            let clip = match area {
                CaptureArea::Clip(b) => (b.x, b.y, b.width, b.height),
                CaptureArea::FullPage => {
                    let size = self.eval_value(PAGE_SIZE).await?;
                    let dim = |k: &str| size.get(k).and_then(serde_json::Value::as_f64);
                    (0.0, 0.0, dim("width").unwrap_or(1280.0), dim("height").unwrap_or(720.0))
                }
            };
            let viewport = Viewport::builder()
                .x(clip.0)
                .y(clip.1)
                .width(clip.2)
                .height(clip.3)
                .scale(1.0)
                .build()
                .map_err(VergerError::page)?;
            let params = CaptureScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .clip(viewport)
                .capture_beyond_viewport(true)
                .build();

            let screenshot = self.page()?.execute(params).await.map_err(page_error)?;

            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(&screenshot.data)
                .map_err(page_error)
        }

        async fn close(&mut self) -> VergerResult<()> {
            let Some(page) = self.page.take() else {
                return Ok(());
            };
            if let Err(e) = page.close().await {
                warn!(error = %e, "failed to close page");
            }
            self.contexts.lock().await.retain(|id| id != &self.context_id);
            self.browser
                .lock()
                .await
                .execute(DisposeBrowserContextParams::new(self.context_id.clone()))
                .await
                .map_err(page_error)?;
            Ok(())
        }
    }
}
