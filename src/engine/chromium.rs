//! Chromium-backed implementation of the portal capabilities.
//!
//! Everything engine-specific lives here: launch flags, the CDP event
//! handler loop, the anti-fingerprint init script and the storage-state
//! plumbing. The rest of the crate only sees `PortalSession`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::engine::capability::{
    ClickOptions, OriginState, PortalSession, SessionFactory, StorageState,
};
use crate::error::{ConsultError, Result};
use crate::mapping::{LoadState, WaitState};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const POST_CLICK_SETTLE: Duration = Duration::from_millis(100);
const NETWORK_IDLE_SETTLE: Duration = Duration::from_millis(500);

/// Script applied before any page script runs, suppressing the usual
/// automation-detection markers.
const STEALTH_INIT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', {get: () => undefined});
window.chrome = {runtime: {}};
Object.defineProperty(navigator, 'plugins', {get: () => [1,2,3]});
Object.defineProperty(navigator, 'languages', {get: () => ['pt-BR', 'pt']});
"#;

/// Opens one fresh chromium session per provider.
pub struct ChromiumFactory {
    headless: bool,
}

impl ChromiumFactory {
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }
}

#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn open(&self, provider: &str) -> Result<Box<dyn PortalSession>> {
        let session = ChromiumSession::launch(provider, self.headless).await?;
        Ok(Box::new(session))
    }
}

pub struct ChromiumSession {
    provider: String,
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl ChromiumSession {
    pub async fn launch(provider: &str, headless: bool) -> Result<Self> {
        debug!("[{}] iniciando chromium (headless={})", provider, headless);

        let mut builder = BrowserConfig::builder().args(vec![
            "--no-sandbox",
            "--disable-blink-features=AutomationControlled",
            "--no-first-run",
            "--no-default-browser-check",
            "--disable-dev-shm-usage",
            "--disable-gpu",
        ]);
        if headless {
            builder = builder.new_headless_mode();
        } else {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| ConsultError::engine(format!("configuração do chromium: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ConsultError::engine(format!("falha ao iniciar chromium: {e}")))?;

        // CDP events keep flowing in the background for the session's life.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        // Give the browser a moment to settle before the first command.
        sleep(Duration::from_millis(300)).await;

        let page = browser.new_page("about:blank").await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            STEALTH_INIT_SCRIPT,
        ))
        .await?;

        Ok(Self {
            provider: provider.to_string(),
            browser: Mutex::new(Some(browser)),
            page,
            handler_task,
        })
    }

    /// Quote a string for safe embedding inside generated JS.
    fn js_string(value: &str) -> String {
        JsonValue::String(value.to_string()).to_string()
    }

    /// "visible" | "attached" | "missing" for the first selector match.
    async fn selector_state(&self, selector: &str) -> Result<String> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return "missing";
                const visible = !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
                return visible ? "visible" : "attached";
            }})()"#,
            sel = Self::js_string(selector)
        );
        let state: String = self.page.evaluate(js).await?.into_value()?;
        Ok(state)
    }

    async fn wait_for_state_matching(
        &self,
        selector: &str,
        target: WaitState,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.selector_state(selector).await?;
            let satisfied = match target {
                WaitState::Visible => state == "visible",
                WaitState::Attached => state != "missing",
                WaitState::Hidden => state != "visible",
            };
            if satisfied {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ConsultError::engine(format!(
                    "timeout aguardando seletor {selector} ({:?})",
                    target
                )));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn ready_state(&self) -> Result<String> {
        let state: String = self
            .page
            .evaluate("document.readyState")
            .await?
            .into_value()?;
        Ok(state)
    }
}

#[async_trait]
impl PortalSession for ChromiumSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        debug!("[{}] navegando para {}", self.provider, url);
        self.page.goto(url).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()> {
        self.wait_for_state_matching(selector, WaitState::Visible, timeout)
            .await?;
        let element = self.page.find_element(selector).await?;
        element.click().await?;
        // Clear any residual content before typing the new value.
        self.page
            .evaluate(format!(
                "document.querySelector({sel}).value = ''",
                sel = Self::js_string(selector)
            ))
            .await?;
        element.type_str(value).await?;
        Ok(())
    }

    async fn click(&self, selector: &str, options: ClickOptions, timeout: Duration) -> Result<()> {
        self.wait_for_state_matching(selector, WaitState::Visible, timeout)
            .await?;
        if options.force {
            // Forced clicks bypass hit-testing, matching obscured elements.
            self.page
                .evaluate(format!(
                    "document.querySelector({sel}).click()",
                    sel = Self::js_string(selector)
                ))
                .await?;
        } else {
            self.page.find_element(selector).await?.click().await?;
        }
        if !options.no_wait_after {
            sleep(POST_CLICK_SETTLE).await;
        }
        Ok(())
    }

    async fn press_key(&self, selector: Option<&str>, key: &str, timeout: Duration) -> Result<()> {
        match selector {
            Some(sel) => {
                self.wait_for_state_matching(sel, WaitState::Visible, timeout)
                    .await?;
                self.page.find_element(sel).await?.press_key(key).await?;
            }
            None => {
                // No page-level keyboard in CDP here; synthesize on the
                // focused element instead.
                let js = format!(
                    r#"(() => {{
                        const el = document.activeElement || document.body;
                        for (const type of ["keydown", "keypress", "keyup"]) {{
                            el.dispatchEvent(new KeyboardEvent(type, {{key: {key}, bubbles: true}}));
                        }}
                        return true;
                    }})()"#,
                    key = Self::js_string(key)
                );
                self.page.evaluate(js).await?;
            }
        }
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<()> {
        self.wait_for_state_matching(selector, state, timeout).await
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let ready = self.ready_state().await?;
            let satisfied = match state {
                LoadState::DomContentLoaded => ready != "loading",
                LoadState::Load | LoadState::NetworkIdle => ready == "complete",
            };
            if satisfied {
                if state == LoadState::NetworkIdle {
                    // CDP exposes no network-idle signal at this level; a
                    // short settle after "complete" is the usable proxy.
                    sleep(NETWORK_IDLE_SETTLE).await;
                }
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ConsultError::engine(format!(
                    "timeout aguardando estado {:?}",
                    state
                )));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn inner_text(&self, selector: &str) -> Result<String> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                return el ? el.innerText : "";
            }})()"#,
            sel = Self::js_string(selector)
        );
        let text: String = self.page.evaluate(js).await?.into_value()?;
        Ok(text)
    }

    async fn content(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.page
            .save_screenshot(
                ScreenshotParams::builder().full_page(true).build(),
                path,
            )
            .await?;
        Ok(())
    }

    async fn storage_state(&self) -> Result<StorageState> {
        let cookies = self
            .page
            .get_cookies()
            .await?
            .into_iter()
            .filter_map(|c| serde_json::to_value(c).ok())
            .collect();

        let js = r#"(() => {
            const items = [];
            for (let i = 0; i < window.localStorage.length; i++) {
                const key = window.localStorage.key(i);
                items.push([key, window.localStorage.getItem(key)]);
            }
            return { origin: window.location.origin, local_storage: items };
        })()"#;
        let origin: OriginState = self.page.evaluate(js).await?.into_value()?;

        let origins = if origin.origin.starts_with("http") && !origin.local_storage.is_empty() {
            vec![origin]
        } else {
            Vec::new()
        };

        Ok(StorageState { cookies, origins })
    }

    async fn apply_storage_state(&self, state: &StorageState) -> Result<()> {
        let params: Vec<CookieParam> = state
            .cookies
            .iter()
            .filter_map(|c| serde_json::from_value(c.clone()).ok())
            .collect();
        if !params.is_empty() {
            if let Err(e) = self.page.set_cookies(params).await {
                warn!("[{}] falha ao restaurar cookies: {}", self.provider, e);
            }
        }

        for origin in &state.origins {
            if origin.local_storage.is_empty() {
                continue;
            }
            let assignments: String = origin
                .local_storage
                .iter()
                .map(|(k, v)| {
                    format!(
                        "window.localStorage.setItem({}, {});",
                        Self::js_string(k),
                        Self::js_string(v)
                    )
                })
                .collect();
            let script = format!(
                r#"(function() {{
                    if (window.location.origin === {origin}) {{
                        try {{ {assignments} }} catch (e) {{}}
                    }}
                }})();"#,
                origin = Self::js_string(&origin.origin),
            );
            self.page
                .execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
                .await?;
        }
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()> {
        if headers.is_empty() {
            return Ok(());
        }
        let value = serde_json::to_value(headers)?;
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(value)))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                warn!("[{}] falha ao fechar o chromium: {}", self.provider, e);
            }
            let _ = browser.wait().await;
        }
        self.handler_task.abort();
        Ok(())
    }
}
