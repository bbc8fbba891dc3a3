//! Flow layer — the complete run of one consultation against one provider.

pub mod context;
pub mod executor;

pub use context::ConsultCtx;
pub use executor::{AttemptFailure, InterpreterOutcome, StepInterpreter, StepReport, StepStatus};
