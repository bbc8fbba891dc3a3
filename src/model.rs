//! Core domain types shared by every layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Kind of tax identifier being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// Individual taxpayer number (11 digits)
    Cpf,
    /// Company taxpayer number (14 digits)
    Cnpj,
}

impl IdentifierKind {
    /// Digit count a cleaned identifier of this kind must have.
    pub fn expected_len(self) -> usize {
        match self {
            IdentifierKind::Cpf => 11,
            IdentifierKind::Cnpj => 14,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IdentifierKind::Cpf => "cpf",
            IdentifierKind::Cnpj => "cnpj",
        }
    }
}

impl std::fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized consultation outcome.
///
/// These five values are the only status vocabulary that may reach callers;
/// portal-specific wording never leaks past the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsultStatus {
    /// Identifier is an active beneficiary
    Positive,
    /// Identifier is known and not active
    Negative,
    /// Portal answered but no keyword matched
    Indefinite,
    /// Consultation failed (step error, retries exhausted, ...)
    Error,
    /// Identifier rejected before any portal was contacted
    Invalid,
}

impl ConsultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsultStatus::Positive => "positive",
            ConsultStatus::Negative => "negative",
            ConsultStatus::Indefinite => "indefinite",
            ConsultStatus::Error => "error",
            ConsultStatus::Invalid => "invalid",
        }
    }

    /// Whether this outcome counts as a resolved consultation for batch
    /// statistics (errors and rejected identifiers do not).
    pub fn is_resolved(self) -> bool {
        !matches!(self, ConsultStatus::Error | ConsultStatus::Invalid)
    }
}

impl std::fmt::Display for ConsultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One identifier to consult, as accepted by the batch API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultationRequest {
    pub identifier: String,
    pub kind: IdentifierKind,
}

/// Final outcome of one (provider, identifier) consultation.
///
/// Immutable once produced; the orchestrator creates exactly one per
/// (provider, identifier) attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationResult {
    pub provider: String,
    pub status: ConsultStatus,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub message: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub debug: Map<String, JsonValue>,
    pub identifier: String,
    pub kind: IdentifierKind,
}

impl ConsultationResult {
    pub fn new(
        provider: impl Into<String>,
        status: ConsultStatus,
        identifier: impl Into<String>,
        kind: IdentifierKind,
    ) -> Self {
        Self {
            provider: provider.into(),
            status,
            plan: String::new(),
            message: String::new(),
            captured_at: Utc::now(),
            debug: Map::new(),
            identifier: identifier.into(),
            kind,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = plan.into();
        self
    }

    pub fn with_debug(mut self, debug: Map<String, JsonValue>) -> Self {
        self.debug = debug;
        self
    }

    /// Error-status result for a failed consultation.
    pub fn failure(
        provider: impl Into<String>,
        identifier: impl Into<String>,
        kind: IdentifierKind,
        message: impl Into<String>,
    ) -> Self {
        Self::new(provider, ConsultStatus::Error, identifier, kind).with_message(message)
    }

    /// Invalid-status result for an identifier rejected before dispatch.
    pub fn rejected(
        identifier: impl Into<String>,
        kind: IdentifierKind,
        message: impl Into<String>,
    ) -> Self {
        Self::new("", ConsultStatus::Invalid, identifier, kind).with_message(message)
    }
}
