//! Automation capability surface — infrastructure layer.
//!
//! The interpreter and session manager talk to portals exclusively through
//! these traits. Nothing above this module names a concrete automation
//! engine, which keeps the whole flow testable with a scripted double.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::mapping::{LoadState, WaitState};

/// Click modifiers forwarded from the mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClickOptions {
    /// Dispatch the click even when the element is obscured.
    pub force: bool,
    /// Skip the post-click settle wait.
    pub no_wait_after: bool,
}

/// Persisted localStorage for one origin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginState {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<(String, String)>,
}

/// Cookie/localStorage snapshot persisted between runs, one per provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<JsonValue>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
}

impl StorageState {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.origins.is_empty()
    }
}

/// One live automated browsing context tied to one provider.
#[async_trait]
pub trait PortalSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Type a value into the element. Fails when the selector never shows up.
    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()>;

    async fn click(&self, selector: &str, options: ClickOptions, timeout: Duration) -> Result<()>;

    /// Send a key to the selector or, with none given, to the active focus.
    async fn press_key(&self, selector: Option<&str>, key: &str, timeout: Duration) -> Result<()>;

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<()>;

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()>;

    /// Visible text of the first match; Ok("") when the element is missing.
    async fn inner_text(&self, selector: &str) -> Result<String>;

    /// Full document HTML.
    async fn content(&self) -> Result<String>;

    async fn screenshot(&self, path: &Path) -> Result<()>;

    async fn storage_state(&self) -> Result<StorageState>;

    async fn apply_storage_state(&self, state: &StorageState) -> Result<()>;

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()>;

    /// Release the underlying automation resources. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Opens sessions. The orchestrator owns one factory for the whole batch;
/// tests swap in a scripted implementation.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, provider: &str) -> Result<Box<dyn PortalSession>>;
}
