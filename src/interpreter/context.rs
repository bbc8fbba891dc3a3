//! Consultation context.
//!
//! Carries "which identifier, against which provider, on which attempt"
//! through the flow, mostly for logging and debug records.

use std::fmt::Display;

use crate::model::IdentifierKind;

#[derive(Debug, Clone)]
pub struct ConsultCtx {
    pub provider: String,
    pub identifier: String,
    pub kind: IdentifierKind,
    /// 1-based attempt number, set by the retry loop.
    pub attempt: u32,
}

impl ConsultCtx {
    pub fn new(
        provider: impl Into<String>,
        identifier: impl Into<String>,
        kind: IdentifierKind,
    ) -> Self {
        Self {
            provider: provider.into(),
            identifier: identifier.into(),
            kind,
            attempt: 1,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

impl Display for ConsultCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} {}#{} tentativa {}]",
            self.provider, self.kind, self.identifier, self.attempt
        )
    }
}
