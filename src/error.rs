//! Error taxonomy for the whole consultation pipeline.
//!
//! The retry loop is the only place that catches these and converts them
//! into typed outcomes; nothing below it swallows a non-optional failure,
//! nothing above it sees a raw engine error.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ConsultError>;

#[derive(Error, Debug)]
pub enum ConsultError {
    /// Identifier rejected before any portal was contacted. Non-retryable.
    #[error("identificador inválido: {message}")]
    Validation { message: String },

    /// A non-optional step failed (selector absent, action threw, timeout).
    /// Retryable under the generic backoff policy.
    #[error("passo {index} ({action}) falhou: {message}")]
    Step {
        index: usize,
        action: &'static str,
        message: String,
    },

    /// Block indicator matched in page content. Triggers the long-cooldown
    /// retry path, never the short backoff.
    #[error("indicativo de bloqueio detectado na página")]
    BlockSignal,

    /// Generic retry budget consumed; carries the last failure's message.
    #[error("falha após {attempts} tentativas: {last}")]
    Exhausted { attempts: u32, last: String },

    /// Automation engine failure (launch, attach, CDP command).
    #[error("erro do engine: {message}")]
    Engine { message: String },

    /// Mapping file missing, unreadable or structurally invalid.
    #[error("mapping de {provider} inválido: {message}")]
    Mapping { provider: String, message: String },

    #[error("erro de configuração: {message}")]
    Config { message: String },

    #[error("erro de I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("erro de serialização: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task abortada: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ConsultError {
    pub fn validation(message: impl Into<String>) -> Self {
        ConsultError::Validation {
            message: message.into(),
        }
    }

    pub fn step(index: usize, action: &'static str, message: impl Into<String>) -> Self {
        ConsultError::Step {
            index,
            action,
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        ConsultError::Engine {
            message: message.into(),
        }
    }

    pub fn mapping(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ConsultError::Mapping {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether the retry loop may re-dispatch after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConsultError::Step { .. } | ConsultError::Engine { .. } | ConsultError::BlockSignal
        )
    }

    pub fn is_block(&self) -> bool {
        matches!(self, ConsultError::BlockSignal)
    }
}

impl From<chromiumoxide::error::CdpError> for ConsultError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ConsultError::Engine {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_retryable_but_distinct() {
        let block = ConsultError::BlockSignal;
        assert!(block.is_retryable());
        assert!(block.is_block());

        let step = ConsultError::step(3, "fill", "selector ausente");
        assert!(step.is_retryable());
        assert!(!step.is_block());
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        let exhausted = ConsultError::Exhausted {
            attempts: 2,
            last: "timeout".into(),
        };
        assert!(!exhausted.is_retryable());
        assert!(!ConsultError::validation("tipo não suportado").is_retryable());
    }
}
