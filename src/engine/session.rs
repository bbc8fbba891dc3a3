//! Per-provider session lifecycle.
//!
//! A session is acquired once per provider batch and reused across every
//! identifier of that batch; the per-provider semaphore upstream guarantees
//! a single in-flight consumer. Release always closes the engine, and a
//! clean release persists the cookie/localStorage snapshot for the next run.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, warn};

use crate::engine::capability::{PortalSession, SessionFactory, StorageState};
use crate::error::Result;
use crate::mapping::ProviderMapping;

pub struct SessionManager {
    factory: Arc<dyn SessionFactory>,
    state_dir: PathBuf,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn SessionFactory>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            factory,
            state_dir: state_dir.into(),
        }
    }

    fn state_path(&self, provider: &str) -> PathBuf {
        self.state_dir.join(format!("{provider}.json"))
    }

    async fn load_state(&self, provider: &str) -> Option<StorageState> {
        let path = self.state_path(provider);
        let content = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("[{}] storage state ilegível, ignorando: {}", provider, e);
                None
            }
        }
    }

    async fn save_state(&self, provider: &str, session: &dyn PortalSession) {
        let state = match session.storage_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!("[{}] falha ao capturar storage state: {}", provider, e);
                return;
            }
        };
        if state.is_empty() {
            return;
        }
        if let Err(e) = self.persist(provider, &state).await {
            warn!("[{}] falha ao salvar storage state: {}", provider, e);
        }
    }

    async fn persist(&self, provider: &str, state: &StorageState) -> Result<()> {
        fs::create_dir_all(&self.state_dir).await?;
        let json = serde_json::to_string(state)?;
        fs::write(self.state_path(provider), json).await?;
        Ok(())
    }

    /// Run `work` inside a scoped session for the provider.
    ///
    /// Acquire restores the persisted snapshot and applies the mapping's
    /// extra headers; release persists the snapshot on success and closes
    /// the engine on every exit path.
    pub async fn with_session<T, F, Fut>(&self, mapping: &ProviderMapping, work: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn PortalSession>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let provider = &mapping.provider;
        let session: Arc<dyn PortalSession> = Arc::from(self.factory.open(provider).await?);

        if !mapping.extra_http_headers.is_empty() {
            if let Err(e) = session.set_extra_headers(&mapping.extra_http_headers).await {
                warn!("[{}] falha ao aplicar headers extras: {}", provider, e);
            }
        }

        if let Some(state) = self.load_state(provider).await {
            debug!("[{}] restaurando storage state persistido", provider);
            if let Err(e) = session.apply_storage_state(&state).await {
                warn!("[{}] falha ao restaurar storage state: {}", provider, e);
            }
        }

        let outcome = work(Arc::clone(&session)).await;

        if outcome.is_ok() {
            self.save_state(provider, session.as_ref()).await;
        }
        if let Err(e) = session.close().await {
            warn!("[{}] falha ao encerrar a sessão: {}", provider, e);
        }

        outcome
    }

    /// Where the provider's snapshot lives; used by diagnostics.
    pub fn state_file(&self, provider: &str) -> PathBuf {
        self.state_path(provider)
    }
}
