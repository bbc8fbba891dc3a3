//! Declarative per-provider mapping schema.
//!
//! A mapping is the whole knowledge the pipeline has about one portal: the
//! entry URL, the ordered interaction steps, the result-parsing rules and
//! the block-detection keywords. Unknown step actions fail at load time,
//! not mid-batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::IdentifierKind;

/// Block keywords applied when a mapping does not configure its own.
pub const DEFAULT_BLOCK_KEYWORDS: [&str; 5] = [
    "captcha",
    "bloque",
    "bloqueado",
    "bloqueio",
    "acesso negado",
];

/// One selector or an ordered list of candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selectors {
    One(String),
    Many(Vec<String>),
}

impl Selectors {
    pub fn candidates(&self) -> Vec<&str> {
        match self {
            Selectors::One(s) => vec![s.as_str()],
            Selectors::Many(list) => list.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Selectors::One(s) => s.is_empty(),
            Selectors::Many(list) => list.iter().all(String::is_empty),
        }
    }
}

/// Target visibility for selector waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WaitState {
    #[default]
    Visible,
    Attached,
    Hidden,
}

/// Coarse page load state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

/// Action-specific part of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Load a target URL (falling back to the mapping's base URL), then
    /// optionally wait for one of the given selectors to become visible.
    Navigate {
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        wait_for: Option<Selectors>,
        #[serde(default)]
        wait_for_any: Option<Selectors>,
    },
    /// Substitute the identifier into the value template and type it into
    /// the selector. Fails when the selector is absent.
    Fill {
        selector: String,
        #[serde(default = "default_fill_value")]
        value: String,
    },
    Click {
        selector: String,
        #[serde(default)]
        force: bool,
        #[serde(default)]
        no_wait_after: Option<bool>,
    },
    /// Send a key to the selector or, with none given, to the active focus.
    #[serde(rename = "keypress")]
    KeyPress {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default = "default_key")]
        key: String,
    },
    WaitFor {
        selector: Selectors,
        #[serde(default)]
        state: WaitState,
    },
    WaitForState {
        #[serde(default)]
        state: LoadState,
    },
    Sleep { seconds: f64 },
}

fn default_fill_value() -> String {
    "{identifier}".to_string()
}

fn default_key() -> String {
    "Enter".to_string()
}

impl StepAction {
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::Navigate { .. } => "navigate",
            StepAction::Fill { .. } => "fill",
            StepAction::Click { .. } => "click",
            StepAction::KeyPress { .. } => "keypress",
            StepAction::WaitFor { .. } => "wait_for",
            StepAction::WaitForState { .. } => "wait_for_state",
            StepAction::Sleep { .. } => "sleep",
        }
    }
}

/// One ordered interaction step. Steps are addressed by index in debug
/// records and error messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: StepAction,
    /// A failure in an optional step is recorded and skipped; a failure in
    /// a non-optional step aborts the sequence.
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Post-action wait, resolved best-effort after the step itself.
    #[serde(default)]
    pub wait_selector: Option<Selectors>,
    /// Post-action delay in seconds.
    #[serde(default)]
    pub delay: Option<f64>,
}

/// Result extraction rules applied after the step sequence completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultParsing {
    #[serde(default)]
    pub status_selectors: Option<Selectors>,
    #[serde(default)]
    pub plan_selectors: Option<Selectors>,
    #[serde(default)]
    pub positive_keywords: Vec<String>,
    #[serde(default)]
    pub negative_keywords: Vec<String>,
    #[serde(default)]
    pub error_keywords: Vec<String>,
    #[serde(default)]
    pub status_timeout_ms: Option<u64>,
    #[serde(default = "default_poll_interval")]
    pub status_poll_interval_ms: u64,
    #[serde(default)]
    pub plan_optional: bool,
}

fn default_poll_interval() -> u64 {
    300
}

/// Full declarative configuration for one provider portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMapping {
    /// Provider name; filled from the mapping filename by the loader.
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub result_parsing: ResultParsing,
    #[serde(default)]
    pub block_indicators: Vec<String>,
    #[serde(default = "default_supported_kinds")]
    pub supported_kinds: Vec<IdentifierKind>,
    /// Extra headers applied once at session acquire (some portals expect a
    /// plausible Referer/Accept-Language pair).
    #[serde(default)]
    pub extra_http_headers: BTreeMap<String, String>,
}

fn default_supported_kinds() -> Vec<IdentifierKind> {
    vec![IdentifierKind::Cpf]
}

impl ProviderMapping {
    pub fn supports(&self, kind: IdentifierKind) -> bool {
        self.supported_kinds.contains(&kind)
    }

    /// Configured block indicators, lowercased, falling back to the default
    /// keyword list when the mapping leaves them out.
    pub fn effective_block_indicators(&self) -> Vec<String> {
        let configured: Vec<String> = self
            .block_indicators
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if configured.is_empty() {
            DEFAULT_BLOCK_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            configured
        }
    }
}
