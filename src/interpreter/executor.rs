//! Step interpreter — flow layer.
//!
//! Drives one consultation through a provider's declarative step list and
//! classifies the resulting page text. Owns no resources: the session is
//! borrowed, the classifier is pure, every outcome is a structured report.
//!
//! Flow: initial navigation → ordered steps (optional steps may fail and
//! be skipped) → block-indicator scan → status capture + classification →
//! plan extraction.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::classifier;
use crate::engine::capability::{ClickOptions, PortalSession};
use crate::error::ConsultError;
use crate::interpreter::context::ConsultCtx;
use crate::mapping::{ProviderMapping, ResultParsing, Selectors, Step, StepAction, WaitState};
use crate::model::ConsultStatus;
use crate::utils::logging::truncate_text;

const MESSAGE_LIMIT: usize = 300;
const PLAN_LIMIT: usize = 300;
const CAPTURE_LIMIT: usize = 500;
const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Structured outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    /// Optional step failed; execution continued.
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_wait_for: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Classified result of a completed step sequence.
#[derive(Debug, Clone)]
pub struct InterpreterOutcome {
    pub status: ConsultStatus,
    pub plan: String,
    pub message: String,
    pub debug: Map<String, JsonValue>,
}

/// A failed attempt: the typed error plus whatever debug the run produced
/// before aborting, so terminal Error results keep their diagnostics.
#[derive(Debug)]
pub struct AttemptFailure {
    pub error: ConsultError,
    pub debug: Map<String, JsonValue>,
}

pub struct StepInterpreter {
    default_timeout: Duration,
    errors_dir: PathBuf,
}

impl StepInterpreter {
    pub fn new(default_timeout_ms: u64, errors_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_timeout: Duration::from_millis(default_timeout_ms),
            errors_dir: errors_dir.into(),
        }
    }

    /// Execute the mapping's step sequence and classify the result.
    pub async fn execute(
        &self,
        mapping: &ProviderMapping,
        session: &dyn PortalSession,
        ctx: &ConsultCtx,
    ) -> Result<InterpreterOutcome, AttemptFailure> {
        let mut run_debug = Map::new();
        let mut reports: Vec<StepReport> = Vec::new();

        if let Some(url) = &mapping.url {
            info!("{ctx} navegando para {url}");
            if let Err(e) = session.navigate(url).await {
                return Err(self
                    .abort(session, ctx, run_debug, reports, ConsultError::step(0, "navigate", e.to_string()))
                    .await);
            }
            run_debug.insert("navigation".into(), json!({ "target": url }));
        }

        for (index, step) in mapping.steps.iter().enumerate() {
            debug!("{ctx} executando passo {index}: {}", step.action.name());
            match self.run_step(mapping, session, ctx, step, index).await {
                Ok(report) => reports.push(report),
                Err((report, error)) => {
                    reports.push(report);
                    return Err(self.abort(session, ctx, run_debug, reports, error).await);
                }
            }
        }

        let indicators = mapping.effective_block_indicators();
        if let Err(error) = self.scan_for_block(session, &indicators).await {
            run_debug.insert("block_detected".into(), json!(true));
            return Err(self.abort(session, ctx, run_debug, reports, error).await);
        }

        let outcome = self
            .parse_result(mapping, session, ctx, &indicators, run_debug, reports)
            .await?;
        info!(
            "{ctx} resultado: status={} | plano={} | mensagem={}",
            outcome.status,
            if outcome.plan.is_empty() { "-" } else { &outcome.plan },
            if outcome.message.is_empty() { "-" } else { &outcome.message },
        );
        Ok(outcome)
    }

    /// Run one step; Err carries the failed report and the typed error.
    async fn run_step(
        &self,
        mapping: &ProviderMapping,
        session: &dyn PortalSession,
        ctx: &ConsultCtx,
        step: &Step,
        index: usize,
    ) -> Result<StepReport, (StepReport, ConsultError)> {
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let action_name = step.action.name();

        let mut report = StepReport {
            index,
            action: action_name,
            selector: step_selector(&step.action),
            status: StepStatus::Ok,
            error: None,
            matched_wait_for: None,
            warnings: Vec::new(),
        };

        let result = self
            .dispatch(mapping, session, ctx, &step.action, timeout, &mut report)
            .await;

        match result {
            Ok(()) => {}
            Err(e) if step.optional => {
                debug!("{ctx} passo opcional '{action_name}' ignorado: {e}");
                report.status = StepStatus::Skipped;
                report.error = Some(e.to_string());
            }
            Err(e) => {
                report.status = StepStatus::Error;
                report.error = Some(e.to_string());
                // Post-waits are skipped on a fatal step.
                return Err((report, ConsultError::step(index, action_name, e.to_string())));
            }
        }

        self.post_step(session, ctx, step, timeout, &mut report).await;
        Ok(report)
    }

    async fn dispatch(
        &self,
        mapping: &ProviderMapping,
        session: &dyn PortalSession,
        ctx: &ConsultCtx,
        action: &StepAction,
        timeout: Duration,
        report: &mut StepReport,
    ) -> crate::error::Result<()> {
        match action {
            StepAction::Navigate {
                target,
                wait_for,
                wait_for_any,
            } => {
                let destination = target.clone().or_else(|| mapping.url.clone());
                if let Some(url) = destination {
                    info!("{ctx} navegando para {url}");
                    session.navigate(&url).await?;
                }
                if let Some(selectors) = wait_for {
                    let matched =
                        wait_any(session, selectors, WaitState::Visible, timeout).await?;
                    report.matched_wait_for = Some(matched);
                }
                if let Some(selectors) = wait_for_any {
                    let matched =
                        wait_any(session, selectors, WaitState::Visible, timeout).await?;
                    report.matched_wait_for = Some(matched);
                }
                Ok(())
            }
            StepAction::Fill { selector, value } => {
                let value = value.replace("{identifier}", &ctx.identifier);
                debug!("{ctx} preenchendo {selector}");
                session.fill(selector, &value, timeout).await
            }
            StepAction::Click {
                selector,
                force,
                no_wait_after,
            } => {
                let options = ClickOptions {
                    force: *force,
                    no_wait_after: no_wait_after.unwrap_or(false),
                };
                debug!("{ctx} clicando em {selector}");
                session.click(selector, options, timeout).await
            }
            StepAction::KeyPress { selector, key } => {
                debug!("{ctx} pressionando {key}");
                session.press_key(selector.as_deref(), key, timeout).await
            }
            StepAction::WaitFor { selector, state } => {
                let matched = wait_any(session, selector, *state, timeout).await?;
                report.matched_wait_for = Some(matched);
                Ok(())
            }
            StepAction::WaitForState { state } => {
                session.wait_for_load_state(*state, timeout).await
            }
            StepAction::Sleep { seconds } => {
                sleep(Duration::from_secs_f64(*seconds)).await;
                Ok(())
            }
        }
    }

    /// Post-step wait/delay, best-effort: failures become report warnings.
    async fn post_step(
        &self,
        session: &dyn PortalSession,
        ctx: &ConsultCtx,
        step: &Step,
        timeout: Duration,
        report: &mut StepReport,
    ) {
        if let Some(selectors) = &step.wait_selector {
            match wait_any(session, selectors, WaitState::Visible, timeout).await {
                Ok(matched) => report.matched_wait_for = Some(matched),
                Err(e) => {
                    warn!("{ctx} espera pós-ação falhou: {e}");
                    report.warnings.push(e.to_string());
                }
            }
        } else if let Some(delay) = step.delay {
            if delay > 0.0 {
                sleep(Duration::from_secs_f64(delay)).await;
            }
        }
    }

    async fn scan_for_block(
        &self,
        session: &dyn PortalSession,
        indicators: &[String],
    ) -> crate::error::Result<()> {
        let html = session.content().await.unwrap_or_default().to_lowercase();
        if indicators.iter().any(|i| html.contains(i.as_str())) {
            return Err(ConsultError::BlockSignal);
        }
        Ok(())
    }

    /// Terminal parse: capture status text, classify, extract the plan.
    async fn parse_result(
        &self,
        mapping: &ProviderMapping,
        session: &dyn PortalSession,
        ctx: &ConsultCtx,
        indicators: &[String],
        mut run_debug: Map<String, JsonValue>,
        reports: Vec<StepReport>,
    ) -> Result<InterpreterOutcome, AttemptFailure> {
        let parsing = &mapping.result_parsing;
        run_debug.insert(
            "steps".into(),
            serde_json::to_value(&reports).unwrap_or_default(),
        );

        let Some(status_selectors) = &parsing.status_selectors else {
            run_debug.insert("captured_text".into(), json!(""));
            return Ok(InterpreterOutcome {
                status: ConsultStatus::Error,
                plan: String::new(),
                message: "status_selector ausente".into(),
                debug: run_debug,
            });
        };

        let status_timeout = parsing
            .status_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let poll = Duration::from_millis(parsing.status_poll_interval_ms.max(MIN_POLL_INTERVAL_MS));

        let (raw_text, matched_selector) =
            capture_status_text(session, status_selectors, status_timeout, poll).await;

        if raw_text.is_empty() {
            // An empty capture is often a challenge page; re-check before
            // classifying it as indefinite.
            if let Err(error) = self.scan_for_block(session, indicators).await {
                run_debug.insert("block_detected".into(), json!(true));
                return Err(self.abort(session, ctx, run_debug, Vec::new(), error).await);
            }
            debug!("{ctx} nenhum seletor de status retornou texto");
        }

        let status = classifier::classify(
            &raw_text,
            &parsing.positive_keywords,
            &parsing.negative_keywords,
            &parsing.error_keywords,
        );
        let message = truncate_text(&raw_text, MESSAGE_LIMIT);

        let plan_text = extract_plan(session, ctx, parsing, status_timeout).await;
        let (status, plan) = classifier::resolve_plan(status, &plan_text, &message);
        let plan = truncate_text(&plan, PLAN_LIMIT);

        run_debug.insert(
            "status_selector".into(),
            match &matched_selector {
                Some(sel) => json!(sel),
                None => json!(status_selectors.candidates()),
            },
        );
        run_debug.insert(
            "status_timeout_ms".into(),
            json!(status_timeout.as_millis() as u64),
        );
        run_debug.insert(
            "captured_text".into(),
            json!(truncate_text(&raw_text, CAPTURE_LIMIT)),
        );
        run_debug.insert(
            "plan_text".into(),
            json!(truncate_text(&plan_text, CAPTURE_LIMIT)),
        );
        run_debug.insert("decided_status".into(), json!(status.as_str()));

        Ok(InterpreterOutcome {
            status,
            plan,
            message,
            debug: run_debug,
        })
    }

    /// Assemble an AttemptFailure, attaching step reports and a screenshot
    /// artifact when one can be captured.
    async fn abort(
        &self,
        session: &dyn PortalSession,
        ctx: &ConsultCtx,
        mut run_debug: Map<String, JsonValue>,
        reports: Vec<StepReport>,
        error: ConsultError,
    ) -> AttemptFailure {
        if !reports.is_empty() {
            run_debug.insert(
                "steps".into(),
                serde_json::to_value(&reports).unwrap_or_default(),
            );
        }
        run_debug.insert("error".into(), json!(error.to_string()));

        if let Some(path) = self.capture_failure_artifact(session, ctx).await {
            run_debug.insert("artifacts".into(), json!({ "screenshot": path }));
        }

        AttemptFailure {
            error,
            debug: run_debug,
        }
    }

    async fn capture_failure_artifact(
        &self,
        session: &dyn PortalSession,
        ctx: &ConsultCtx,
    ) -> Option<String> {
        let dir = self.errors_dir.join(&ctx.provider);
        if tokio::fs::create_dir_all(&dir).await.is_err() {
            return None;
        }
        let path = dir.join(format!("{}.png", Utc::now().format("%Y%m%d_%H%M%S%3f")));
        match session.screenshot(&path).await {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!("{ctx} falha ao salvar screenshot de erro: {e}");
                None
            }
        }
    }
}

fn step_selector(action: &StepAction) -> Option<String> {
    match action {
        StepAction::Fill { selector, .. } | StepAction::Click { selector, .. } => {
            Some(selector.clone())
        }
        StepAction::KeyPress { selector, .. } => selector.clone(),
        StepAction::WaitFor { selector, .. } => Some(selector.candidates().join(", ")),
        _ => None,
    }
}

/// Probe candidates in order; the first that reaches the state wins.
async fn wait_any(
    session: &dyn PortalSession,
    selectors: &Selectors,
    state: WaitState,
    timeout: Duration,
) -> crate::error::Result<String> {
    let candidates = selectors.candidates();
    let mut last_error = None;
    for candidate in &candidates {
        if candidate.is_empty() {
            continue;
        }
        match session.wait_for_selector(candidate, state, timeout).await {
            Ok(()) => return Ok(candidate.to_string()),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        ConsultError::engine(format!("nenhum seletor válido informado: {candidates:?}"))
    }))
}

/// Poll the ordered status selectors until one yields non-empty text.
async fn capture_status_text(
    session: &dyn PortalSession,
    selectors: &Selectors,
    timeout: Duration,
    poll: Duration,
) -> (String, Option<String>) {
    for selector in selectors.candidates() {
        if selector.is_empty() {
            continue;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let text = session
                .inner_text(selector)
                .await
                .unwrap_or_default()
                .trim()
                .to_string();
            if !text.is_empty() {
                return (text, Some(selector.to_string()));
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(poll).await;
        }
    }
    (String::new(), None)
}

/// First plan selector with non-empty text, or empty. Best-effort: plan
/// extraction never aborts a run.
async fn extract_plan(
    session: &dyn PortalSession,
    ctx: &ConsultCtx,
    parsing: &ResultParsing,
    timeout: Duration,
) -> String {
    let Some(selectors) = &parsing.plan_selectors else {
        return String::new();
    };

    let mut last_error: Option<ConsultError> = None;
    for selector in selectors.candidates() {
        if selector.is_empty() {
            continue;
        }
        if let Err(e) = session
            .wait_for_selector(selector, WaitState::Visible, timeout)
            .await
        {
            last_error = Some(e);
            continue;
        }
        match session.inner_text(selector).await {
            Ok(text) if !text.trim().is_empty() => return text.trim().to_string(),
            Ok(_) => {}
            Err(e) => last_error = Some(e),
        }
    }

    if let Some(e) = last_error {
        if !parsing.plan_optional {
            warn!("{ctx} falha ao capturar plano: {e}");
        }
    }
    String::new()
}
