//! Mapping files: discovery, parsing and the hot-reloadable registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{ConsultError, Result};
use crate::mapping::types::ProviderMapping;
use crate::model::IdentifierKind;

/// Resolve the mapping file for a provider, accepting naming variants
/// (`seguros_unimed.toml`, `segurosunimed.toml`, `seguros-unimed.toml`).
pub fn resolve_mapping_path(dir: &Path, provider: &str) -> PathBuf {
    let mut candidates = vec![dir.join(format!("{provider}.toml"))];

    let collapsed = provider.replace('_', "");
    if collapsed != provider {
        candidates.push(dir.join(format!("{collapsed}.toml")));
    }
    let dashed = provider.replace('_', "-");
    if dashed != provider && dashed != collapsed {
        candidates.push(dir.join(format!("{dashed}.toml")));
    }

    for candidate in &candidates {
        if candidate.exists() {
            return candidate.clone();
        }
    }
    candidates.remove(0)
}

/// Load and parse one mapping file; the provider name comes from the caller
/// (normally the file stem).
pub async fn load_mapping(path: &Path, provider: &str) -> Result<ProviderMapping> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| ConsultError::mapping(provider, format!("{}: {e}", path.display())))?;

    let mut mapping: ProviderMapping = toml::from_str(&content)
        .map_err(|e| ConsultError::mapping(provider, e.to_string()))?;
    mapping.provider = provider.to_lowercase();
    Ok(mapping)
}

/// Scan a directory for `*.toml` mappings. Files that fail to parse are
/// logged and skipped so one broken mapping does not take down the rest.
pub async fn load_all_mappings(dir: &Path) -> Result<Vec<ProviderMapping>> {
    if !dir.is_dir() {
        return Err(ConsultError::Config {
            message: format!("diretório de mappings não existe: {}", dir.display()),
        });
    }

    let mut mappings = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("toml") {
            continue;
        }
        let provider = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_lowercase(),
            None => continue,
        };

        match load_mapping(&path, &provider).await {
            Ok(mapping) => {
                info!(
                    "mapping carregado: {} ({} passos)",
                    provider,
                    mapping.steps.len()
                );
                mappings.push(mapping);
            }
            Err(e) => {
                warn!("mapping ignorado {}: {}", path.display(), e);
            }
        }
    }

    Ok(mappings)
}

/// Hot-reloadable set of provider mappings.
///
/// Loaded once at startup; `reload` re-reads the whole directory without
/// recreating consumers.
pub struct MappingRegistry {
    dir: PathBuf,
    inner: RwLock<HashMap<String, Arc<ProviderMapping>>>,
}

impl MappingRegistry {
    pub async fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let registry = Self {
            dir,
            inner: RwLock::new(HashMap::new()),
        };
        registry.reload().await?;
        Ok(registry)
    }

    /// Re-read every mapping file, replacing the previous set.
    pub async fn reload(&self) -> Result<()> {
        let mappings = load_all_mappings(&self.dir).await?;
        let mut inner = self.inner.write().await;
        inner.clear();
        for mapping in mappings {
            inner.insert(mapping.provider.clone(), Arc::new(mapping));
        }
        Ok(())
    }

    pub async fn get(&self, provider: &str) -> Option<Arc<ProviderMapping>> {
        self.inner.read().await.get(&provider.to_lowercase()).cloned()
    }

    /// Re-read a single provider's mapping file, accepting filename
    /// variants, without touching the rest of the registry.
    pub async fn reload_provider(&self, provider: &str) -> Result<Arc<ProviderMapping>> {
        let provider = provider.to_lowercase();
        let path = resolve_mapping_path(&self.dir, &provider);
        let mapping = Arc::new(load_mapping(&path, &provider).await?);
        self.inner
            .write()
            .await
            .insert(provider, Arc::clone(&mapping));
        Ok(mapping)
    }

    pub async fn all(&self) -> Vec<Arc<ProviderMapping>> {
        let mut all: Vec<_> = self.inner.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        all
    }

    /// Providers whose mapping declares support for the given kind.
    pub async fn providers_for(&self, kind: IdentifierKind) -> Vec<Arc<ProviderMapping>> {
        self.all()
            .await
            .into_iter()
            .filter(|m| m.supports(kind))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
