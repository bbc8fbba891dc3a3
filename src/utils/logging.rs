//! Logging setup and batch lifecycle banners.

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Safe to call more than once
/// (later calls are no-ops), which keeps tests independent.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

pub fn log_startup(max_concurrency: usize, providers: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 consulta de beneficiários iniciada");
    info!("📊 concorrência global: {} | providers: {}", max_concurrency, providers);
    info!("{}", "=".repeat(60));
}

pub fn log_batch_loaded(total: usize, invalid: usize) {
    info!("✓ {} identificadores carregados ({} inválidos)", total, invalid);
}

pub fn log_final_stats(success: usize, error: usize, total: usize) {
    info!("{}", "=".repeat(60));
    info!("✅ resolvidos: {}/{}", success, total);
    info!("❌ falhas: {}", error);
    info!("{}", "=".repeat(60));
}

/// Truncate long captured text for logs and stored records.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
