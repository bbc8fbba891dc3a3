//! End-to-end batch scenarios over a scripted engine double.
//!
//! No real browser: the fake factory hands out scripted sessions whose
//! selectors, texts and page HTML are fixed per provider, and the
//! recording sleeper makes the retry pacing observable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use beneficio_check::engine::{ClickOptions, PortalSession, SessionFactory, StorageState};
use beneficio_check::error::ConsultError;
use beneficio_check::mapping::{LoadState, WaitState};
use beneficio_check::metrics::{MetricRecord, MetricsSink, NullMetricsSink};
use beneficio_check::orchestrator::{ProgressObserver, Sleeper};
use beneficio_check::{
    CacheStore, Config, ConsultStatus, ConsultationResult, IdentifierKind, MappingRegistry,
    MemoryCacheStore, Orchestrator,
};

const CPF: &str = "11144477735";
const CPF_2: &str = "52998224725";

// ---------- scripted doubles ----------

#[derive(Clone, Default)]
struct Fixture {
    present: HashSet<String>,
    texts: HashMap<String, String>,
    html: String,
    /// content() returns a captcha page for this many first calls.
    captcha_contents: usize,
    fail_open: bool,
}

impl Fixture {
    fn portal(present: &[&str], texts: &[(&str, &str)]) -> Self {
        Self {
            present: present.iter().map(|s| s.to_string()).collect(),
            texts: texts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            html: "<html>consulta</html>".to_string(),
            ..Self::default()
        }
    }
}

struct ScriptedSession {
    provider: String,
    fixture: Fixture,
    log: Arc<Mutex<Vec<String>>>,
    content_calls: AtomicUsize,
}

impl ScriptedSession {
    fn push(&self, event: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.provider, event));
    }
}

#[async_trait]
impl PortalSession for ScriptedSession {
    async fn navigate(&self, url: &str) -> beneficio_check::Result<()> {
        self.push(&format!("navigate:{url}"));
        Ok(())
    }

    async fn fill(
        &self,
        selector: &str,
        value: &str,
        _timeout: Duration,
    ) -> beneficio_check::Result<()> {
        if !self.fixture.present.contains(selector) {
            return Err(ConsultError::engine(format!("seletor ausente: {selector}")));
        }
        self.push(&format!("fill:{selector}={value}"));
        Ok(())
    }

    async fn click(
        &self,
        selector: &str,
        _options: ClickOptions,
        _timeout: Duration,
    ) -> beneficio_check::Result<()> {
        if !self.fixture.present.contains(selector) {
            return Err(ConsultError::engine(format!("seletor ausente: {selector}")));
        }
        self.push(&format!("click:{selector}"));
        Ok(())
    }

    async fn press_key(
        &self,
        selector: Option<&str>,
        key: &str,
        _timeout: Duration,
    ) -> beneficio_check::Result<()> {
        self.push(&format!("press:{}:{key}", selector.unwrap_or("<focus>")));
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        _timeout: Duration,
    ) -> beneficio_check::Result<()> {
        let found = self.fixture.present.contains(selector);
        let satisfied = match state {
            WaitState::Visible | WaitState::Attached => found,
            WaitState::Hidden => !found,
        };
        if satisfied {
            Ok(())
        } else {
            Err(ConsultError::engine(format!("timeout: {selector}")))
        }
    }

    async fn wait_for_load_state(
        &self,
        _state: LoadState,
        _timeout: Duration,
    ) -> beneficio_check::Result<()> {
        Ok(())
    }

    async fn inner_text(&self, selector: &str) -> beneficio_check::Result<String> {
        Ok(self.fixture.texts.get(selector).cloned().unwrap_or_default())
    }

    async fn content(&self) -> beneficio_check::Result<String> {
        let call = self.content_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fixture.captcha_contents {
            Ok("<html>Confirme o captcha para continuar</html>".to_string())
        } else {
            Ok(self.fixture.html.clone())
        }
    }

    async fn screenshot(&self, _path: &Path) -> beneficio_check::Result<()> {
        Err(ConsultError::engine("sem screenshot no double"))
    }

    async fn storage_state(&self) -> beneficio_check::Result<StorageState> {
        Ok(StorageState::default())
    }

    async fn apply_storage_state(&self, _state: &StorageState) -> beneficio_check::Result<()> {
        Ok(())
    }

    async fn set_extra_headers(
        &self,
        _headers: &BTreeMap<String, String>,
    ) -> beneficio_check::Result<()> {
        Ok(())
    }

    async fn close(&self) -> beneficio_check::Result<()> {
        self.push("close");
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedFactory {
    fixtures: Mutex<HashMap<String, Fixture>>,
    log: Arc<Mutex<Vec<String>>>,
    opens: AtomicUsize,
}

impl ScriptedFactory {
    fn with_fixture(provider: &str, fixture: Fixture) -> Self {
        let factory = Self::default();
        factory.add(provider, fixture);
        factory
    }

    fn add(&self, provider: &str, fixture: Fixture) {
        self.fixtures
            .lock()
            .unwrap()
            .insert(provider.to_string(), fixture);
    }

    fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self, provider: &str) -> beneficio_check::Result<Box<dyn PortalSession>> {
        let fixture = self
            .fixtures
            .lock()
            .unwrap()
            .get(provider)
            .cloned()
            .unwrap_or_default();
        if fixture.fail_open {
            return Err(ConsultError::engine("falha ao iniciar o navegador"));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            provider: provider.to_string(),
            fixture,
            log: Arc::clone(&self.log),
            content_calls: AtomicUsize::new(0),
        }))
    }
}

#[derive(Default)]
struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn recorded(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    fn cooldowns(&self, cooldown: Duration) -> usize {
        self.recorded().iter().filter(|d| **d == cooldown).count()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

#[derive(Default)]
struct CollectingProgress {
    events: Mutex<Vec<(String, String, ConsultStatus, bool)>>,
}

impl CollectingProgress {
    fn events(&self) -> Vec<(String, String, ConsultStatus, bool)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressObserver for CollectingProgress {
    async fn on_result(&self, result: &ConsultationResult, from_cache: bool) {
        self.events.lock().unwrap().push((
            result.identifier.clone(),
            result.provider.clone(),
            result.status,
            from_cache,
        ));
    }
}

#[derive(Default)]
struct CollectingMetrics {
    records: Mutex<Vec<MetricRecord>>,
}

impl CollectingMetrics {
    fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSink for CollectingMetrics {
    async fn record(&self, record: MetricRecord) -> beneficio_check::Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

// ---------- harness ----------

const AMIL_MAPPING: &str = r##"
url = "https://portal.amil.example.com.br"

[[steps]]
action = "fill"
selector = "#doc"
value = "{identifier}"

[[steps]]
action = "click"
selector = "#go"

[[steps]]
action = "wait_for"
selector = ".result"

[result_parsing]
status_selectors = ".result"
plan_selectors = ".plan"
positive_keywords = ["ATIVO"]
negative_keywords = ["NENHUM RESULTADO"]
status_timeout_ms = 100
plan_optional = true
"##;

struct Harness {
    orchestrator: Orchestrator,
    factory: Arc<ScriptedFactory>,
    sleeper: Arc<RecordingSleeper>,
    cache: Arc<MemoryCacheStore>,
    progress: Arc<CollectingProgress>,
    metrics: Arc<CollectingMetrics>,
    _tmp: tempfile::TempDir,
}

impl Harness {
    async fn new(mappings: &[(&str, &str)], factory: ScriptedFactory) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mappings_dir = tmp.path().join("mappings");
        std::fs::create_dir_all(&mappings_dir).unwrap();
        for (provider, body) in mappings {
            std::fs::write(mappings_dir.join(format!("{provider}.toml")), body).unwrap();
        }

        let config = Config {
            max_concurrency: 4,
            per_provider_concurrency: 1,
            fetch_min_delay: 0.0,
            fetch_max_delay: 0.0,
            max_retries: 2,
            block_sleep_seconds: 120,
            max_block_cooldowns: 2,
            timeout_selector_ms: 200,
            cache_ttl_days: 7,
            mappings_dir: mappings_dir.to_string_lossy().into_owned(),
            state_dir: tmp.path().join("state").to_string_lossy().into_owned(),
            cache_dir: tmp.path().join("cache").to_string_lossy().into_owned(),
            errors_dir: tmp.path().join("errors").to_string_lossy().into_owned(),
            metrics_file: tmp
                .path()
                .join("metrics.jsonl")
                .to_string_lossy()
                .into_owned(),
            headless: true,
        };

        let registry = Arc::new(MappingRegistry::load(&config.mappings_dir).await.unwrap());
        let factory = Arc::new(factory);
        let sleeper = Arc::new(RecordingSleeper::default());
        let orchestrator = Orchestrator::with_sleeper(
            config,
            registry,
            Arc::clone(&factory) as Arc<dyn SessionFactory>,
            Arc::clone(&sleeper) as Arc<dyn Sleeper>,
        );

        Self {
            orchestrator,
            factory,
            sleeper,
            cache: Arc::new(MemoryCacheStore::new(7)),
            progress: Arc::new(CollectingProgress::default()),
            metrics: Arc::new(CollectingMetrics::default()),
            _tmp: tmp,
        }
    }

    async fn run(&self, identifiers: &[&str], kind: IdentifierKind) -> Vec<ConsultationResult> {
        self.orchestrator
            .run_batch(
                &identifiers.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                kind,
                Arc::clone(&self.cache) as Arc<dyn beneficio_check::CacheStore>,
                Arc::clone(&self.metrics) as Arc<dyn MetricsSink>,
                Arc::clone(&self.progress) as Arc<dyn ProgressObserver>,
            )
            .await
    }
}

const COOLDOWN: Duration = Duration::from_secs(120);

// ---------- scenarios ----------

#[tokio::test]
async fn positive_flow_extracts_status_and_plan() {
    let fixture = Fixture::portal(
        &["#doc", "#go", ".result", ".plan"],
        &[(".result", "Plano Ativo"), (".plan", "Plano Top Nacional")],
    );
    let harness = Harness::new(
        &[("amil", AMIL_MAPPING)],
        ScriptedFactory::with_fixture("amil", fixture),
    )
    .await;

    let results = harness.run(&[CPF], IdentifierKind::Cpf).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ConsultStatus::Positive);
    assert_eq!(results[0].plan, "Plano Top Nacional");
    assert_eq!(results[0].identifier, CPF);

    let events = harness.factory.events();
    assert!(events.contains(&format!("amil:fill:#doc={CPF}")));
    // The session is always released.
    assert!(events.contains(&"amil:close".to_string()));

    let progress = harness.progress.events();
    assert_eq!(progress.len(), 1);
    assert!(!progress[0].3, "fresh consultation is not a cache hit");
}

#[tokio::test]
async fn exhausted_retries_yield_exactly_one_error_result() {
    // No selectors present: every attempt dies on the first fill.
    let harness = Harness::new(
        &[("amil", AMIL_MAPPING)],
        ScriptedFactory::with_fixture("amil", Fixture::portal(&[], &[])),
    )
    .await;

    let results = harness.run(&[CPF], IdentifierKind::Cpf).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ConsultStatus::Error);
    assert_eq!(results[0].debug["attempts"], 2);

    // The interpreter ran exactly max_retries times: one initial
    // navigation per attempt.
    let navigations = harness
        .factory
        .events()
        .iter()
        .filter(|e| e.starts_with("amil:navigate:"))
        .count();
    assert_eq!(navigations, 2);

    // One short backoff between the two attempts, never the long cooldown.
    assert_eq!(harness.sleeper.cooldowns(COOLDOWN), 0);
    let backoffs = harness
        .sleeper
        .recorded()
        .iter()
        .filter(|d| **d > Duration::from_secs(1) && **d < COOLDOWN)
        .count();
    assert_eq!(backoffs, 1);
}

#[tokio::test]
async fn block_signal_cools_down_then_recovers() {
    let mut fixture = Fixture::portal(
        &["#doc", "#go", ".result"],
        &[(".result", "Plano Ativo")],
    );
    fixture.captcha_contents = 1;
    let harness = Harness::new(
        &[("amil", AMIL_MAPPING)],
        ScriptedFactory::with_fixture("amil", fixture),
    )
    .await;

    let results = harness.run(&[CPF], IdentifierKind::Cpf).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ConsultStatus::Positive);
    // Exactly one long cooldown, clearly distinct from jitter/backoff.
    assert_eq!(harness.sleeper.cooldowns(COOLDOWN), 1);
}

#[tokio::test]
async fn persistent_blocks_exhaust_the_cooldown_budget() {
    let mut fixture = Fixture::portal(&["#doc", "#go", ".result"], &[(".result", "Plano Ativo")]);
    fixture.captcha_contents = usize::MAX;
    let harness = Harness::new(
        &[("amil", AMIL_MAPPING)],
        ScriptedFactory::with_fixture("amil", fixture),
    )
    .await;

    let results = harness.run(&[CPF], IdentifierKind::Cpf).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ConsultStatus::Error);
    assert_eq!(results[0].debug["status_source"], "block");
    assert_eq!(harness.sleeper.cooldowns(COOLDOWN), 2);
}

#[tokio::test]
async fn cache_hit_skips_step_execution() {
    let harness = Harness::new(
        &[("amil", AMIL_MAPPING)],
        ScriptedFactory::with_fixture("amil", Fixture::portal(&[], &[])),
    )
    .await;

    let cached = ConsultationResult::new("amil", ConsultStatus::Positive, CPF, IdentifierKind::Cpf)
        .with_plan("Plano Top")
        .with_message("Plano Ativo");
    harness
        .cache
        .set("amil", CPF, serde_json::to_value(&cached).unwrap())
        .await
        .unwrap();

    let results = harness.run(&[CPF], IdentifierKind::Cpf).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ConsultStatus::Positive);
    assert_eq!(results[0].debug["cache_hit"], true);

    // No step ever touched the portal.
    assert!(!harness
        .factory
        .events()
        .iter()
        .any(|e| e.contains("fill") || e.contains("navigate")));

    let progress = harness.progress.events();
    assert_eq!(progress.len(), 1);
    assert!(progress[0].3, "resolution came from cache");

    let records = harness.metrics.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].cached);
}

#[tokio::test]
async fn error_outcomes_are_never_cached() {
    // Mapping without status selectors: classified as Error, not retried.
    let mapping = r#"
url = "https://portal.amil.example.com.br"

[[steps]]
action = "navigate"
"#;
    let harness = Harness::new(
        &[("amil", mapping)],
        ScriptedFactory::with_fixture("amil", Fixture::portal(&[], &[])),
    )
    .await;

    let results = harness.run(&[CPF], IdentifierKind::Cpf).await;
    assert_eq!(results[0].status, ConsultStatus::Error);
    assert!(harness.cache.get("amil", CPF).await.unwrap().is_none());
}

#[tokio::test]
async fn invalid_identifier_is_rejected_without_consuming_a_session() {
    let harness = Harness::new(
        &[("amil", AMIL_MAPPING)],
        ScriptedFactory::with_fixture("amil", Fixture::portal(&[], &[])),
    )
    .await;

    let results = harness.run(&["123"], IdentifierKind::Cpf).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ConsultStatus::Invalid);
    assert_eq!(harness.factory.opens(), 0);
}

#[tokio::test]
async fn unsupported_kind_is_rejected_for_every_identifier() {
    let harness = Harness::new(
        &[("amil", AMIL_MAPPING)], // cpf only
        ScriptedFactory::with_fixture("amil", Fixture::portal(&[], &[])),
    )
    .await;

    let results = harness.run(&["12345678000195"], IdentifierKind::Cnpj).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ConsultStatus::Invalid);
    assert_eq!(harness.factory.opens(), 0);
}

#[tokio::test]
async fn one_provider_failing_does_not_poison_the_others() {
    let good = Fixture::portal(
        &["#doc", "#go", ".result"],
        &[(".result", "Beneficiário Ativo")],
    );
    let mut bad = Fixture::portal(&[], &[]);
    bad.fail_open = true;

    let factory = ScriptedFactory::with_fixture("amil", good);
    factory.add("bradesco", bad);

    let harness = Harness::new(
        &[("amil", AMIL_MAPPING), ("bradesco", AMIL_MAPPING)],
        factory,
    )
    .await;

    let mut results = harness.run(&[CPF], IdentifierKind::Cpf).await;
    results.sort_by(|a, b| a.provider.cmp(&b.provider));

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].provider, "amil");
    assert_eq!(results[0].status, ConsultStatus::Positive);
    assert_eq!(results[1].provider, "bradesco");
    assert_eq!(results[1].status, ConsultStatus::Error);
}

#[tokio::test]
async fn same_provider_identifiers_share_one_session_sequentially() {
    let fixture = Fixture::portal(
        &["#doc", "#go", ".result"],
        &[(".result", "Plano Ativo")],
    );
    let harness = Harness::new(
        &[("amil", AMIL_MAPPING)],
        ScriptedFactory::with_fixture("amil", fixture),
    )
    .await;

    let results = harness.run(&[CPF, CPF_2], IdentifierKind::Cpf).await;
    assert_eq!(results.len(), 2);

    // One session for the whole provider batch.
    assert_eq!(harness.factory.opens(), 1);

    // Step intervals never interleave: every event of the first identifier
    // precedes every event of the second.
    let events = harness.factory.events();
    let last_first = events
        .iter()
        .rposition(|e| e.contains(CPF))
        .expect("eventos do primeiro identificador");
    let first_second = events
        .iter()
        .position(|e| e.contains(CPF_2))
        .expect("eventos do segundo identificador");
    assert!(last_first < first_second);
}

#[tokio::test]
async fn progress_fires_exactly_once_per_identifier_provider_pair() {
    let fixture = Fixture::portal(
        &["#doc", "#go", ".result"],
        &[(".result", "Plano Ativo")],
    );
    let factory = ScriptedFactory::with_fixture("amil", fixture.clone());
    factory.add("bradesco", fixture);

    let harness = Harness::new(
        &[("amil", AMIL_MAPPING), ("bradesco", AMIL_MAPPING)],
        factory,
    )
    .await;

    let results = harness.run(&[CPF, CPF_2], IdentifierKind::Cpf).await;
    assert_eq!(results.len(), 4);

    let mut pairs: Vec<(String, String)> = harness
        .progress
        .events()
        .into_iter()
        .map(|(identifier, provider, _, _)| (identifier, provider))
        .collect();
    assert_eq!(pairs.len(), 4, "uma notificação por (identificador, provider)");
    pairs.sort();
    pairs.dedup();
    assert_eq!(pairs.len(), 4, "nenhum par notificado em duplicidade");
}

#[tokio::test]
async fn null_metrics_sink_never_fails_the_batch() {
    let fixture = Fixture::portal(&["#doc", "#go", ".result"], &[(".result", "Plano Ativo")]);
    let harness = Harness::new(
        &[("amil", AMIL_MAPPING)],
        ScriptedFactory::with_fixture("amil", fixture),
    )
    .await;

    let results = harness
        .orchestrator
        .run_batch(
            &[CPF.to_string()],
            IdentifierKind::Cpf,
            Arc::clone(&harness.cache) as Arc<dyn beneficio_check::CacheStore>,
            Arc::new(NullMetricsSink),
            Arc::clone(&harness.progress) as Arc<dyn ProgressObserver>,
        )
        .await;

    assert_eq!(results[0].status, ConsultStatus::Positive);
}
