//! Batch orchestrator — orchestration layer.
//!
//! ## Responsibilities
//!
//! 1. **Validation**: invalid identifiers become Invalid results up front,
//!    consuming no concurrency token.
//! 2. **Fan-out**: one task per provider (per concurrency slot), bounded by
//!    the global semaphore and the per-provider semaphore.
//! 3. **Aggregation**: every (identifier, provider) pair yields exactly one
//!    result, even when a whole provider task dies.
//! 4. **Statistics**: batch lifecycle banners and final counts.
//!
//! Providers run concurrently; identifiers within one provider run
//! strictly sequentially inside that provider's session. Callers must not
//! assume cross-provider ordering of progress notifications.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::engine::capability::SessionFactory;
use crate::engine::session::SessionManager;
use crate::interpreter::StepInterpreter;
use crate::mapping::MappingRegistry;
use crate::metrics::MetricsSink;
use crate::model::{ConsultationRequest, ConsultationResult, IdentifierKind};
use crate::orchestrator::provider_runner::{ProgressObserver, ProviderRunner};
use crate::orchestrator::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::utils::ident;
use crate::utils::logging::{log_batch_loaded, log_final_stats, log_startup};

/// Explicit concurrency tokens, constructed once per orchestrator.
///
/// Holding the global token and the provider-keyed map here (instead of in
/// process-wide statics) keeps every run independently testable.
pub struct ConcurrencyContext {
    global: Arc<Semaphore>,
    per_provider: HashMap<String, Arc<Semaphore>>,
    per_provider_limit: usize,
}

impl ConcurrencyContext {
    pub fn new(global_limit: usize, per_provider_limit: usize, providers: &[String]) -> Self {
        let per_provider = providers
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    Arc::new(Semaphore::new(per_provider_limit.max(1))),
                )
            })
            .collect();
        Self {
            global: Arc::new(Semaphore::new(global_limit.max(1))),
            per_provider,
            per_provider_limit: per_provider_limit.max(1),
        }
    }

    pub fn global(&self) -> Arc<Semaphore> {
        Arc::clone(&self.global)
    }

    pub fn provider(&self, name: &str) -> Arc<Semaphore> {
        self.per_provider
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(Semaphore::new(self.per_provider_limit)))
    }
}

pub struct Orchestrator {
    config: Config,
    registry: Arc<MappingRegistry>,
    runner: Arc<ProviderRunner>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        registry: Arc<MappingRegistry>,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        Self::with_sleeper(config, registry, factory, Arc::new(TokioSleeper))
    }

    /// Same as `new`, with an injected sleeper so tests can observe pacing.
    pub fn with_sleeper(
        config: Config,
        registry: Arc<MappingRegistry>,
        factory: Arc<dyn SessionFactory>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let interpreter = Arc::new(StepInterpreter::new(
            config.timeout_selector_ms,
            &config.errors_dir,
        ));
        let sessions = Arc::new(SessionManager::new(factory, &config.state_dir));
        let policy = RetryPolicy::from_config(&config);
        let runner = Arc::new(ProviderRunner::new(interpreter, sessions, policy, sleeper));
        Self {
            config,
            registry,
            runner,
        }
    }

    /// Consult every identifier against every eligible provider.
    ///
    /// Always returns one result per (identifier, provider) pair for valid
    /// identifiers, plus one Invalid result per rejected identifier.
    pub async fn run_batch(
        &self,
        identifiers: &[String],
        kind: IdentifierKind,
        cache: Arc<dyn CacheStore>,
        metrics: Arc<dyn MetricsSink>,
        progress: Arc<dyn ProgressObserver>,
    ) -> Vec<ConsultationResult> {
        let mut results: Vec<ConsultationResult> = Vec::new();

        let mut valid: Vec<ConsultationRequest> = Vec::new();
        for raw in identifiers {
            let digits = ident::clean_identifier(raw);
            if ident::is_valid(&digits, kind) {
                valid.push(ConsultationRequest {
                    identifier: digits,
                    kind,
                });
            } else {
                results.push(ConsultationResult::rejected(
                    raw.clone(),
                    kind,
                    "identificador inválido",
                ));
            }
        }

        let providers = self.registry.providers_for(kind).await;
        log_startup(self.config.max_concurrency, providers.len());
        log_batch_loaded(identifiers.len(), results.len());

        if providers.is_empty() {
            for request in &valid {
                results.push(ConsultationResult::rejected(
                    request.identifier.clone(),
                    kind,
                    format!("nenhum provider suporta identificadores {kind}"),
                ));
            }
            return results;
        }
        if valid.is_empty() {
            return results;
        }

        let provider_names: Vec<String> =
            providers.iter().map(|m| m.provider.clone()).collect();
        let tokens = ConcurrencyContext::new(
            self.config.max_concurrency,
            self.config.per_provider_concurrency,
            &provider_names,
        );

        // Per-provider slots: with the default capacity of 1, the whole
        // identifier list runs in one session; higher capacities split it
        // into that many chunks, each with its own session and permit.
        let slots = self.config.per_provider_concurrency.max(1);
        let chunk_size = valid.len().div_ceil(slots).max(1);

        let mut handles = Vec::new();
        for mapping in &providers {
            let provider_name = mapping.provider.clone();
            for chunk in valid.chunks(chunk_size) {
                let chunk: Vec<ConsultationRequest> = chunk.to_vec();
                let mapping = Arc::clone(mapping);
                let runner = Arc::clone(&self.runner);
                let cache = Arc::clone(&cache);
                let metrics = Arc::clone(&metrics);
                let progress = Arc::clone(&progress);
                let global = tokens.global();
                let provider_sem = tokens.provider(&provider_name);

                let task_chunk = chunk.clone();
                let handle = tokio::spawn(async move {
                    let Ok(_global_permit) = global.acquire_owned().await else {
                        return chunk_failure(
                            &mapping.provider,
                            &task_chunk,
                            "semáforo global encerrado",
                        );
                    };
                    let Ok(_provider_permit) = provider_sem.acquire_owned().await else {
                        return chunk_failure(
                            &mapping.provider,
                            &task_chunk,
                            "semáforo do provider encerrado",
                        );
                    };
                    runner
                        .run(mapping, task_chunk, cache, metrics, progress)
                        .await
                });
                handles.push((provider_name.clone(), chunk, handle));
            }
        }

        for (provider, chunk, handle) in handles {
            match handle.await {
                Ok(mut chunk_results) => results.append(&mut chunk_results),
                Err(e) => {
                    // A panicked provider task never takes the batch down.
                    error!("[{}] task do provider abortou: {}", provider, e);
                    results.extend(chunk_failure(&provider, &chunk, &e.to_string()));
                }
            }
        }

        let success = results.iter().filter(|r| r.status.is_resolved()).count();
        log_final_stats(success, results.len() - success, results.len());
        results
    }

    /// Re-read every mapping file without rebuilding the orchestrator.
    pub async fn reload_mappings(&self) -> crate::error::Result<()> {
        self.registry.reload().await?;
        info!("mappings recarregados: {}", self.registry.len().await);
        Ok(())
    }
}

fn chunk_failure(
    provider: &str,
    chunk: &[ConsultationRequest],
    message: &str,
) -> Vec<ConsultationResult> {
    chunk
        .iter()
        .map(|request| {
            ConsultationResult::failure(
                provider,
                request.identifier.clone(),
                request.kind,
                message,
            )
        })
        .collect()
}
