use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};

use beneficio_check::utils::ident;
use beneficio_check::{
    ChromiumFactory, Config, FileCacheStore, IdentifierKind, JsonlMetricsSink, MappingRegistry,
    NullProgress, Orchestrator,
};

#[tokio::main]
async fn main() -> Result<()> {
    beneficio_check::utils::logging::init();

    let config = Config::from_env();

    let identifiers: Vec<String> = std::env::args().skip(1).collect();
    if identifiers.is_empty() {
        bail!("uso: beneficio_check <cpf|cnpj> [<cpf|cnpj> ...]");
    }

    let registry = Arc::new(MappingRegistry::load(&config.mappings_dir).await?);
    let factory = Arc::new(ChromiumFactory::new(config.headless));
    let cache = Arc::new(FileCacheStore::new(&config.cache_dir, config.cache_ttl_days));
    let metrics = Arc::new(JsonlMetricsSink::new(&config.metrics_file));

    let orchestrator = Orchestrator::new(config, registry, factory);

    // Group by detected kind; undetectable identifiers ride along with the
    // CPF batch and come back as Invalid results.
    let mut groups: BTreeMap<&'static str, (IdentifierKind, Vec<String>)> = BTreeMap::new();
    for identifier in identifiers {
        let kind = ident::detect_kind(&identifier).unwrap_or(IdentifierKind::Cpf);
        groups
            .entry(kind.as_str())
            .or_insert_with(|| (kind, Vec::new()))
            .1
            .push(identifier);
    }

    for (_, (kind, group)) in groups {
        let results = orchestrator
            .run_batch(
                &group,
                kind,
                cache.clone(),
                metrics.clone(),
                Arc::new(NullProgress),
            )
            .await;

        for result in results {
            let display = match result.kind {
                IdentifierKind::Cpf => ident::format_cpf(&result.identifier),
                IdentifierKind::Cnpj => ident::format_cnpj(&result.identifier),
            };
            println!(
                "{} | {} | {} | {} | {}",
                result.provider,
                display,
                result.status,
                if result.plan.is_empty() { "-" } else { &result.plan },
                if result.message.is_empty() { "-" } else { &result.message },
            );
        }
    }

    Ok(())
}
