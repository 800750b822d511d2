//! The engine handle.
//!
//! An [`Engine`] owns the active `(registry, index)` pair as one immutable
//! [`EngineSnapshot`] behind an `Arc`. Queries clone the `Arc` and work
//! against that snapshot without further locking. [`Engine::reload`] builds
//! a complete replacement off to the side and swaps it in with a single
//! pointer write; a failed rebuild leaves the previous snapshot active.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug_span, info, info_span, warn};

use crate::assembler::{AssembledDocument, ContentAssembler};
use crate::config::EngineConfig;
use crate::definition::{DefinitionSource, PromptDirectorySource, StructuredFileSource};
use crate::error::Result;
use crate::matcher::{IndexStats, PatternIndex, PatternMatch, ToolboxDetector};
use crate::metrics::{CounterSnapshot, EngineCounters, LatencyMonitor, LatencyPercentiles, spans};
use crate::module::{BodyResolver, DirectoryBodyResolver};
use crate::registry::{LoadReport, ModuleRegistry};
use crate::router::{IntentRouter, RouteDecision};
use crate::types::EnvironmentSnapshot;

/// One consistent registry/index generation.
#[derive(Debug)]
pub struct EngineSnapshot {
    registry: ModuleRegistry,
    index: PatternIndex,
    generation: u64,
    loaded_at: DateTime<Utc>,
}

impl EngineSnapshot {
    fn empty() -> Self {
        Self {
            registry: ModuleRegistry::new(),
            index: PatternIndex::empty(),
            generation: 0,
            loaded_at: Utc::now(),
        }
    }

    /// Registered modules.
    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Keyword index built from [`Self::registry`].
    #[must_use]
    pub fn index(&self) -> &PatternIndex {
        &self.index
    }

    /// Monotonic generation (0 = nothing has loaded yet).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When this generation was published.
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Active generation.
    pub generation: u64,
    /// When the active generation was published.
    pub loaded_at: DateTime<Utc>,
    /// Registered modules.
    pub modules: usize,
    /// Index size figures.
    pub index: IndexStats,
    /// Event counters.
    pub counters: CounterSnapshot,
    /// Recent routing latency.
    pub route_latency: LatencyPercentiles,
}

/// Explicitly constructed content-selection engine.
pub struct Engine {
    config: EngineConfig,
    sources: Vec<Box<dyn DefinitionSource>>,
    resolver: Option<Arc<dyn BodyResolver>>,
    state: RwLock<Arc<EngineSnapshot>>,
    reload_lock: Mutex<()>,
    assembler: ContentAssembler,
    toolbox: ToolboxDetector,
    counters: EngineCounters,
    route_latency: LatencyMonitor,
}

impl Engine {
    /// Create an engine over `sources`, resolving body references from
    /// `config.sources.body_dir` when set.
    ///
    /// Never fails: if the initial load produces nothing the engine starts
    /// empty (generation 0) and a later [`Engine::reload`] can fill it.
    #[must_use]
    pub fn new(config: EngineConfig, sources: Vec<Box<dyn DefinitionSource>>) -> Self {
        let resolver = config
            .sources
            .body_dir
            .as_ref()
            .map(|dir| Arc::new(DirectoryBodyResolver::new(dir)) as Arc<dyn BodyResolver>);
        Self::with_resolver(config, sources, resolver)
    }

    /// Create an engine whose sources are the ones named in `config.sources`.
    #[must_use]
    pub fn from_config(config: EngineConfig) -> Self {
        let mut sources: Vec<Box<dyn DefinitionSource>> = Vec::new();
        if let Some(ref path) = config.sources.modules_file {
            sources.push(Box::new(StructuredFileSource::new(path)));
        }
        if let Some(ref dir) = config.sources.prompt_dir {
            sources.push(Box::new(PromptDirectorySource::new(dir)));
        }
        Self::new(config, sources)
    }

    /// Create an engine with an explicit body resolver.
    #[must_use]
    pub fn with_resolver(
        config: EngineConfig,
        sources: Vec<Box<dyn DefinitionSource>>,
        resolver: Option<Arc<dyn BodyResolver>>,
    ) -> Self {
        let engine = Self {
            assembler: ContentAssembler::new(config.assembler.clone()),
            toolbox: ToolboxDetector::new(&config.toolbox),
            route_latency: LatencyMonitor::new(config.telemetry.log_slow_operations_ms),
            counters: EngineCounters::new(),
            state: RwLock::new(Arc::new(EngineSnapshot::empty())),
            reload_lock: Mutex::new(()),
            sources,
            resolver,
            config,
        };

        if let Err(e) = engine.reload() {
            warn!(error = %e, "Initial module load failed, starting empty");
        }
        engine
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The active snapshot. Holding it pins that generation.
    #[must_use]
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&*self.state.read())
    }

    /// Active generation number.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Re-read every source and atomically publish a new generation.
    ///
    /// Concurrent reloads are serialised. Readers are never blocked for
    /// longer than one pointer swap.
    ///
    /// # Errors
    ///
    /// Returns the load or build error when no new generation could be
    /// produced; the previous generation stays active.
    pub fn reload(&self) -> Result<LoadReport> {
        let _guard = self.reload_lock.lock();
        let _span = info_span!(spans::RELOAD).entered();
        let start = Instant::now();

        let built = ModuleRegistry::load(
            &self.sources,
            self.resolver.as_ref(),
            &self.config.sources.disabled_modules,
        )
        .and_then(|(registry, report)| {
            let index = PatternIndex::build(&registry, self.config.index.max_automaton_nodes)?;
            Ok((registry, index, report))
        });

        let (registry, index, report) = match built {
            Ok(parts) => parts,
            Err(e) => {
                EngineCounters::bump(&self.counters.reload_failures);
                warn!(
                    error = %e,
                    generation = self.generation(),
                    "Reload failed, keeping previous state"
                );
                return Err(e);
            }
        };

        let generation = self.generation() + 1;
        let snapshot = Arc::new(EngineSnapshot {
            registry,
            index,
            generation,
            loaded_at: Utc::now(),
        });
        *self.state.write() = snapshot;
        EngineCounters::bump(&self.counters.reloads);

        info!(
            generation,
            modules = report.registered,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Engine state published"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Find every registered pattern in `text`.
    #[must_use]
    pub fn search(&self, text: &str) -> Vec<PatternMatch> {
        let _span = debug_span!(spans::SEARCH).entered();
        let snap = self.snapshot();
        let start = Instant::now();
        let matches = snap.index.search(text);
        self.record_search(start.elapsed());
        matches
    }

    /// Distinct intents matched in `text` at the routing threshold.
    #[must_use]
    pub fn matched_intents(&self, text: &str) -> Vec<String> {
        let snap = self.snapshot();
        let start = Instant::now();
        let intents = snap
            .index
            .matched_intents(text, self.config.router.min_score_threshold);
        self.record_search(start.elapsed());
        intents
    }

    /// Route free-form text.
    #[must_use]
    pub fn route(&self, text: &str, env: &EnvironmentSnapshot) -> RouteDecision {
        let _span = debug_span!(spans::ROUTE).entered();
        let snap = self.snapshot();
        let router = IntentRouter::new(&snap.registry, &snap.index, &self.config.router);
        let decision = router.route(text, env);
        self.record_search(decision.elapsed);
        self.record_route(&decision);
        decision
    }

    /// Route from explicit intent labels.
    #[must_use]
    pub fn route_by_intents<S: AsRef<str>>(&self, intents: &[S], env: &EnvironmentSnapshot) -> RouteDecision {
        let snap = self.snapshot();
        let decision =
            IntentRouter::new(&snap.registry, &snap.index, &self.config.router).route_by_intents(intents, env);
        self.record_route(&decision);
        decision
    }

    /// Activate named modules, bypassing matching and gating.
    #[must_use]
    pub fn force_route<S: AsRef<str>>(&self, names: &[S], env: &EnvironmentSnapshot) -> RouteDecision {
        let snap = self.snapshot();
        let decision =
            IntentRouter::new(&snap.registry, &snap.index, &self.config.router).force_route(names, env);
        self.record_route(&decision);
        decision
    }

    /// Route and return only module names.
    #[must_use]
    pub fn quick_route(&self, text: &str, env: &EnvironmentSnapshot) -> Vec<String> {
        self.route(text, env)
            .modules
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Whether `text` calls for the caller's tool list.
    #[must_use]
    pub fn needs_toolbox(&self, text: &str) -> bool {
        let snap = self.snapshot();
        self.toolbox.needs_toolbox(text, &snap.index, &snap.registry)
    }

    /// Assemble a routed decision. An error decision yields the
    /// always-active document with the error carried over.
    #[must_use]
    pub fn assemble(&self, decision: &RouteDecision, context: &BTreeMap<String, String>) -> AssembledDocument {
        if let Some(ref error) = decision.error {
            let mut doc = self.core_document(&decision.environment, context);
            doc.error = Some(error.clone());
            return doc;
        }
        let _span = debug_span!(spans::ASSEMBLE).entered();
        let doc = self.assembler.assemble_decision(decision, context);
        self.record_assembly(&doc);
        doc
    }

    /// Route and assemble in one call.
    #[must_use]
    pub fn generate(
        &self,
        text: &str,
        env: &EnvironmentSnapshot,
        context: &BTreeMap<String, String>,
    ) -> AssembledDocument {
        let decision = self.route(text, env);
        self.assemble(&decision, context)
    }

    /// Document built from always-active modules (and their dependencies) only.
    #[must_use]
    pub fn core_document(&self, env: &EnvironmentSnapshot, context: &BTreeMap<String, String>) -> AssembledDocument {
        let snap = self.snapshot();
        let no_intents: &[&str] = &[];
        let decision =
            IntentRouter::new(&snap.registry, &snap.index, &self.config.router).route_by_intents(no_intents, env);
        let doc = self.assembler.assemble(&decision.modules, env, context);
        self.record_assembly(&doc);
        doc
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let snap = self.snapshot();
        EngineStats {
            generation: snap.generation,
            loaded_at: snap.loaded_at,
            modules: snap.registry.len(),
            index: snap.index.stats(),
            counters: self.counters.snapshot(),
            route_latency: self.route_latency.percentiles(),
        }
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    fn record_search(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        EngineCounters::bump(&self.counters.searches);
        self.counters
            .search_nanos
            .fetch_add(nanos, std::sync::atomic::Ordering::Relaxed);
    }

    fn record_route(&self, decision: &RouteDecision) {
        EngineCounters::bump(&self.counters.routes);
        if !decision.is_success() {
            EngineCounters::bump(&self.counters.route_failures);
        }
        let ms = decision.elapsed.as_secs_f64() * 1000.0;
        if self.route_latency.record(ms) {
            warn!(
                elapsed_ms = ms,
                threshold_ms = self.route_latency.slow_ms(),
                modules = decision.modules.len(),
                "Slow route"
            );
        }
    }

    fn record_assembly(&self, doc: &AssembledDocument) {
        EngineCounters::bump(&self.counters.assemblies);
        if doc.truncated {
            EngineCounters::bump(&self.counters.truncations);
        }
        if !doc.render_failures.is_empty() {
            self.counters.template_fallbacks.fetch_add(
                doc.render_failures.len() as u64,
                std::sync::atomic::Ordering::Relaxed,
            );
        }
    }
}
