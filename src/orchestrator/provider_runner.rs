//! Single-provider runner — orchestration layer.
//!
//! Walks one provider's assigned identifiers strictly sequentially inside
//! one persistent session: cache-first lookup, then the retry loop around
//! the step interpreter. Every identifier always yields exactly one
//! result; failures never escape as raw errors.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::engine::session::SessionManager;
use crate::engine::PortalSession;
use crate::interpreter::{AttemptFailure, ConsultCtx, StepInterpreter};
use crate::mapping::ProviderMapping;
use crate::metrics::{MetricRecord, MetricsSink};
use crate::model::{ConsultationRequest, ConsultationResult};
use crate::orchestrator::retry::{RetryPolicy, Sleeper};

/// Receives every (identifier, provider) resolution exactly once.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_result(&self, result: &ConsultationResult, from_cache: bool);
}

/// Ignores progress; handy default for tests and fire-and-forget runs.
#[derive(Default)]
pub struct NullProgress;

#[async_trait]
impl ProgressObserver for NullProgress {
    async fn on_result(&self, _result: &ConsultationResult, _from_cache: bool) {}
}

pub struct ProviderRunner {
    interpreter: Arc<StepInterpreter>,
    sessions: Arc<SessionManager>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ProviderRunner {
    pub fn new(
        interpreter: Arc<StepInterpreter>,
        sessions: Arc<SessionManager>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            interpreter,
            sessions,
            policy,
            sleeper,
        }
    }

    /// Process this provider's identifiers inside one scoped session.
    ///
    /// A wholesale failure (session launch, for instance) degrades into one
    /// Error result per identifier instead of aborting the batch.
    pub async fn run(
        &self,
        mapping: Arc<ProviderMapping>,
        requests: Vec<ConsultationRequest>,
        cache: Arc<dyn CacheStore>,
        metrics: Arc<dyn MetricsSink>,
        progress: Arc<dyn ProgressObserver>,
    ) -> Vec<ConsultationResult> {
        let provider = mapping.provider.clone();
        info!(
            "[{}] iniciando lote com {} identificadores",
            provider,
            requests.len()
        );

        let outcome = self
            .sessions
            .with_session(&mapping, |session| {
                let mapping = Arc::clone(&mapping);
                let cache = Arc::clone(&cache);
                let metrics = Arc::clone(&metrics);
                let progress = Arc::clone(&progress);
                let requests = requests.clone();
                async move {
                    let mut results = Vec::with_capacity(requests.len());
                    for request in requests {
                        let result = self
                            .consult_one(
                                &mapping,
                                session.as_ref(),
                                &request,
                                &cache,
                                &metrics,
                                &progress,
                            )
                            .await;
                        results.push(result);
                    }
                    Ok(results)
                }
            })
            .await;

        match outcome {
            Ok(results) => results,
            Err(e) => {
                warn!("[{}] lote inteiro falhou: {}", provider, e);
                requests
                    .iter()
                    .map(|request| {
                        ConsultationResult::failure(
                            provider.clone(),
                            request.identifier.clone(),
                            request.kind,
                            e.to_string(),
                        )
                    })
                    .collect()
            }
        }
    }

    /// One identifier: cache-first, then the retry loop.
    async fn consult_one(
        &self,
        mapping: &ProviderMapping,
        session: &dyn PortalSession,
        request: &ConsultationRequest,
        cache: &Arc<dyn CacheStore>,
        metrics: &Arc<dyn MetricsSink>,
        progress: &Arc<dyn ProgressObserver>,
    ) -> ConsultationResult {
        let provider = &mapping.provider;

        match cache.get(provider, &request.identifier).await {
            Ok(Some(payload)) => {
                if let Ok(mut result) = serde_json::from_value::<ConsultationResult>(payload) {
                    info!("[{}] cache hit para {}", provider, request.identifier);
                    result.debug.insert("cache_hit".into(), json!(true));
                    self.record_metric(metrics, provider, &request.identifier, true, 0, true)
                        .await;
                    progress.on_result(&result, true).await;
                    return result;
                }
                // Undecodable payload: fall through to a fresh consultation.
            }
            Ok(None) => {}
            Err(e) => warn!("[{}] falha ao consultar cache: {}", provider, e),
        }

        let started = Instant::now();
        let result = self.consult_with_retry(mapping, session, request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if result.status.is_resolved() {
            match serde_json::to_value(&result) {
                Ok(payload) => {
                    if let Err(e) = cache.set(provider, &request.identifier, payload).await {
                        warn!("[{}] falha ao gravar cache: {}", provider, e);
                    }
                }
                Err(e) => warn!("[{}] resultado não serializável: {}", provider, e),
            }
        }

        self.record_metric(
            metrics,
            provider,
            &request.identifier,
            result.status.is_resolved(),
            duration_ms,
            false,
        )
        .await;
        progress.on_result(&result, false).await;
        result
    }

    /// Attempt state machine: generic failures burn the retry budget with a
    /// short backoff; block signals burn their own cooldown budget without
    /// touching the generic one.
    async fn consult_with_retry(
        &self,
        mapping: &ProviderMapping,
        session: &dyn PortalSession,
        request: &ConsultationRequest,
    ) -> ConsultationResult {
        let mut attempt: u32 = 0;
        let mut cooldowns: u32 = 0;

        loop {
            attempt += 1;
            let ctx = ConsultCtx::new(&mapping.provider, &request.identifier, request.kind)
                .with_attempt(attempt);
            info!(
                "{ctx} disparando consulta ({}/{})",
                attempt, self.policy.max_attempts
            );

            self.sleeper.sleep(self.policy.jitter()).await;

            match self.interpreter.execute(mapping, session, &ctx).await {
                Ok(outcome) => {
                    let mut result = ConsultationResult::new(
                        &mapping.provider,
                        outcome.status,
                        &request.identifier,
                        request.kind,
                    )
                    .with_plan(outcome.plan)
                    .with_message(outcome.message)
                    .with_debug(outcome.debug);
                    result
                        .debug
                        .insert("attempts".into(), json!(attempt));
                    return result;
                }
                Err(failure) if failure.error.is_block() => {
                    cooldowns += 1;
                    if cooldowns > self.policy.max_block_cooldowns {
                        warn!("{ctx} bloqueios persistentes, desistindo");
                        return self.terminal_failure(mapping, request, failure, attempt);
                    }
                    warn!(
                        "{ctx} bloqueio detectado, aguardando cooldown ({}/{})",
                        cooldowns, self.policy.max_block_cooldowns
                    );
                    self.sleeper.sleep(self.policy.block_cooldown).await;
                    // A cooldown restores the generic budget for the retry.
                    attempt -= 1;
                }
                Err(failure) => {
                    if attempt >= self.policy.max_attempts {
                        warn!("{ctx} última tentativa esgotada: {}", failure.error);
                        return self.terminal_failure(mapping, request, failure, attempt);
                    }
                    warn!("{ctx} falha na tentativa: {}", failure.error);
                    self.sleeper.sleep(self.policy.backoff()).await;
                }
            }
        }
    }

    fn terminal_failure(
        &self,
        mapping: &ProviderMapping,
        request: &ConsultationRequest,
        failure: AttemptFailure,
        attempts: u32,
    ) -> ConsultationResult {
        let message = if failure.error.is_block() {
            failure.error.to_string()
        } else {
            crate::error::ConsultError::Exhausted {
                attempts,
                last: failure.error.to_string(),
            }
            .to_string()
        };
        let mut result = ConsultationResult::failure(
            &mapping.provider,
            &request.identifier,
            request.kind,
            message,
        )
        .with_debug(failure.debug);
        result.debug.insert("attempts".into(), json!(attempts));
        result.debug.insert(
            "status_source".into(),
            json!(if failure.error.is_block() {
                "block"
            } else {
                "retries_exhausted"
            }),
        );
        result
    }

    async fn record_metric(
        &self,
        metrics: &Arc<dyn MetricsSink>,
        provider: &str,
        identifier: &str,
        success: bool,
        duration_ms: u64,
        cached: bool,
    ) {
        let record = MetricRecord::new(provider, identifier, success, duration_ms, cached);
        if let Err(e) = metrics.record(record).await {
            warn!("[{}] falha ao registrar métrica: {}", provider, e);
        }
    }
}
