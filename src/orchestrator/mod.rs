//! Orchestration layer.
//!
//! ## Module split
//!
//! ### `batch` — multi-provider batch orchestrator
//! - validates identifiers and partitions them by supported kind
//! - owns the concurrency context (global + per-provider semaphores)
//! - fans providers out, aggregates results, logs batch statistics
//!
//! ### `provider_runner` — single-provider runner
//! - one persistent session per slot, identifiers strictly sequential
//! - cache-first lookup, metrics, progress notification
//! - retry loop with jitter/backoff/block-cooldown
//!
//! ### `retry` — pacing policy and the injectable sleeper
//!
//! ## Layering
//!
//! ```text
//! batch (Vec<identifier> × Vec<provider>)
//!     ↓
//! provider_runner (one provider's identifiers, one session)
//!     ↓
//! interpreter::StepInterpreter (one consultation)
//!     ↓
//! services (classifier / cache / metrics)
//!     ↓
//! engine (capabilities)
//! ```

pub mod batch;
pub mod provider_runner;
pub mod retry;

pub use batch::{ConcurrencyContext, Orchestrator};
pub use provider_runner::{NullProgress, ProgressObserver, ProviderRunner};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
