//! Routing: from pattern hits and environment state to a final module list.
//!
//! Resolution runs in fixed stages: threshold filter, environment gating,
//! always-active injection, dependency closure, exclusion resolution, then
//! ranking and truncation. Exclusion and truncation treat a module and the
//! dependencies it pulled in as one unit, so neither can strand a module
//! without a dependency that passed gating.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::config::RouterConfig;
use crate::error::{EngineError, Result};
use crate::matcher::{PatternIndex, PatternMatch};
use crate::module::ContentModule;
use crate::registry::ModuleRegistry;
use crate::types::EnvironmentSnapshot;

// ---------------------------------------------------------------------------
// RouteDecision
// ---------------------------------------------------------------------------

fn serialize_module_names<S: Serializer>(
    modules: &[Arc<ContentModule>],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(modules.iter().map(|m| m.name()))
}

/// Result of one routing call.
///
/// A failed resolution is not an `Err`: the decision carries `error` and an
/// empty module list, and callers fall back to always-active content.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    /// Input text that was routed (empty for intent/forced routes).
    pub input: String,
    /// Resolved modules, ranked.
    #[serde(serialize_with = "serialize_module_names")]
    pub modules: Vec<Arc<ContentModule>>,
    /// Environment the decision was made against.
    pub environment: EnvironmentSnapshot,
    /// Distinct intents that triggered matches.
    pub intents: Vec<String>,
    /// Raw pattern matches, best first.
    pub matches: Vec<PatternMatch>,
    /// Failure description, if resolution failed.
    pub error: Option<String>,
    /// Wall time spent routing.
    pub elapsed: Duration,
}

impl RouteDecision {
    fn failed(input: &str, environment: &EnvironmentSnapshot, error: &EngineError, elapsed: Duration) -> Self {
        Self {
            input: input.to_string(),
            modules: Vec::new(),
            environment: environment.clone(),
            intents: Vec::new(),
            matches: Vec::new(),
            error: Some(error.to_string()),
            elapsed,
        }
    }

    /// Whether resolution succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Names of the resolved modules, in order.
    #[must_use]
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Multi-line human-readable summary.
    #[must_use]
    pub fn debug_report(&self) -> String {
        let mut out = String::new();
        let status = if self.is_success() { "OK" } else { "FAILED" };
        let _ = writeln!(out, "=== Route Decision ===");
        let _ = writeln!(out, "Status: {status}");
        let _ = writeln!(out, "Time: {:.3}ms", self.elapsed.as_secs_f64() * 1000.0);
        let _ = writeln!(out, "In combat: {}", self.environment.is_in_combat);
        let _ = writeln!(out, "Intents: [{}]", self.intents.join(", "));
        let _ = writeln!(out, "Modules ({}):", self.modules.len());
        for m in &self.modules {
            let _ = writeln!(out, "  - {} ({}, priority {})", m.name(), m.category(), m.priority());
        }
        if !self.matches.is_empty() {
            let _ = writeln!(out, "Top matches:");
            for m in self.matches.iter().take(5) {
                let _ = writeln!(
                    out,
                    "  - {} intent='{}' score={:.2} hits=[{}]",
                    m.module,
                    m.intent,
                    m.score,
                    m.hit_keywords.join(", ")
                );
            }
        }
        if let Some(ref e) = self.error {
            let _ = writeln!(out, "Error: {e}");
        }
        out
    }
}

// ---------------------------------------------------------------------------
// IntentRouter
// ---------------------------------------------------------------------------

/// Resolves module sets against one registry/index snapshot.
#[derive(Debug, Clone, Copy)]
pub struct IntentRouter<'a> {
    registry: &'a ModuleRegistry,
    index: &'a PatternIndex,
    config: &'a RouterConfig,
}

impl<'a> IntentRouter<'a> {
    /// Borrow a consistent registry/index pair.
    #[must_use]
    pub fn new(registry: &'a ModuleRegistry, index: &'a PatternIndex, config: &'a RouterConfig) -> Self {
        Self {
            registry,
            index,
            config,
        }
    }

    /// Route free-form text.
    #[must_use]
    pub fn route(&self, text: &str, env: &EnvironmentSnapshot) -> RouteDecision {
        let start = Instant::now();
        let matches = self.index.search(text);

        match self.resolve_matches(&matches, env) {
            Ok((modules, intents)) => {
                debug!(modules = modules.len(), intents = intents.len(), "Route resolved");
                RouteDecision {
                    input: text.to_string(),
                    modules,
                    environment: env.clone(),
                    intents,
                    matches,
                    error: None,
                    elapsed: start.elapsed(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Route resolution failed");
                let mut decision = RouteDecision::failed(text, env, &e, start.elapsed());
                decision.matches = matches;
                decision
            }
        }
    }

    /// Route from explicit intent labels (case-insensitive), skipping text
    /// matching.
    #[must_use]
    pub fn route_by_intents<S: AsRef<str>>(&self, intents: &[S], env: &EnvironmentSnapshot) -> RouteDecision {
        let start = Instant::now();
        let wanted: HashSet<String> = intents.iter().map(|i| i.as_ref().to_lowercase()).collect();

        let seeds: Vec<Arc<ContentModule>> = self
            .registry
            .all_modules()
            .filter(|m| {
                m.trigger_intents()
                    .iter()
                    .any(|i| wanted.contains(&i.to_lowercase()))
            })
            .filter(|m| m.can_activate(env))
            .cloned()
            .collect();

        let modules = self.finish(seeds, env, true, true);
        RouteDecision {
            input: String::new(),
            modules,
            environment: env.clone(),
            intents: intents.iter().map(|i| i.as_ref().to_string()).collect(),
            matches: Vec::new(),
            error: None,
            elapsed: start.elapsed(),
        }
    }

    /// Activate named modules regardless of matching and gating.
    ///
    /// Dependency closure and exclusion resolution still apply; the result
    /// is not truncated. Unknown names are logged and skipped.
    #[must_use]
    pub fn force_route<S: AsRef<str>>(&self, names: &[S], env: &EnvironmentSnapshot) -> RouteDecision {
        let start = Instant::now();
        let mut seeds = Vec::with_capacity(names.len());
        for name in names {
            match self.registry.get(name.as_ref()) {
                Some(m) => seeds.push(Arc::clone(m)),
                None => warn!(module = name.as_ref(), "Forced module not registered, skipping"),
            }
        }

        let modules = self.finish(seeds, env, false, false);
        RouteDecision {
            input: String::new(),
            modules,
            environment: env.clone(),
            intents: Vec::new(),
            matches: Vec::new(),
            error: None,
            elapsed: start.elapsed(),
        }
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

    fn resolve_matches(
        &self,
        matches: &[PatternMatch],
        env: &EnvironmentSnapshot,
    ) -> Result<(Vec<Arc<ContentModule>>, Vec<String>)> {
        let mut intents: Vec<String> = Vec::new();
        let mut seeds: Vec<Arc<ContentModule>> = Vec::new();

        for m in matches.iter().filter(|m| m.score >= self.config.min_score_threshold) {
            if !m.intent.is_empty() && !intents.contains(&m.intent) {
                intents.push(m.intent.clone());
            }
            let module = self.registry.get(&m.module).ok_or_else(|| {
                EngineError::RouteFailure(format!(
                    "index references unregistered module '{}'",
                    m.module
                ))
            })?;
            if module.can_activate(env) {
                seeds.push(Arc::clone(module));
            }
        }

        Ok((self.finish(seeds, env, true, true), intents))
    }

    /// Always-active injection, closure, exclusion, ranking.
    fn finish(
        &self,
        seeds: Vec<Arc<ContentModule>>,
        env: &EnvironmentSnapshot,
        gated: bool,
        truncate: bool,
    ) -> Vec<Arc<ContentModule>> {
        let mut candidates = seeds;
        candidates.extend(
            self.registry
                .always_active()
                .filter(|m| m.can_activate(env))
                .cloned(),
        );

        let resolved = self.dependency_closure(candidates, env, gated);
        let mut kept = resolve_exclusions(resolved);
        rank(&mut kept);
        if truncate && kept.len() > self.config.max_modules {
            let before = kept.len();
            kept = fit_to_limit(&kept, self.config.max_modules);
            debug!(
                dropped = before - kept.len(),
                max = self.config.max_modules,
                "Truncating routed modules"
            );
        }
        kept
    }

    /// Breadth-first closure over `dependencies`. A module that cannot
    /// activate is dropped together with its outgoing edges.
    fn dependency_closure(
        &self,
        candidates: Vec<Arc<ContentModule>>,
        env: &EnvironmentSnapshot,
        gated: bool,
    ) -> Vec<Arc<ContentModule>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<Arc<ContentModule>> = VecDeque::new();
        for c in candidates {
            if visited.insert(c.name().to_string()) {
                queue.push_back(c);
            }
        }

        let mut resolved = Vec::new();
        while let Some(module) = queue.pop_front() {
            if gated && !module.can_activate(env) {
                debug!(module = %module.name(), "Dropping module that cannot activate");
                continue;
            }
            for dep in module.dependencies() {
                if !visited.insert(dep.clone()) {
                    continue;
                }
                match self.registry.get(dep) {
                    Some(d) => queue.push_back(Arc::clone(d)),
                    None => warn!(module = %module.name(), dependency = %dep, "Unknown dependency"),
                }
            }
            resolved.push(module);
        }
        resolved
    }
}

type Pool<'m> = HashMap<&'m str, &'m Arc<ContentModule>>;

fn pool_of(modules: &[Arc<ContentModule>]) -> Pool<'_> {
    modules.iter().map(|m| (m.name(), m)).collect()
}

/// `root` followed by every module it transitively depends on inside `pool`.
///
/// Dependencies outside the pool were already ruled out by the closure
/// (unknown or gated), so they are not part of the unit.
fn dependency_unit<'m>(root: &'m Arc<ContentModule>, pool: &Pool<'m>) -> Vec<&'m Arc<ContentModule>> {
    let mut seen: HashSet<&str> = HashSet::from([root.name()]);
    let mut unit = vec![root];
    let mut cursor = 0;
    while let Some(module) = unit.get(cursor).copied() {
        cursor += 1;
        for dep in module.dependencies() {
            if let Some(&d) = pool.get(dep.as_str()) {
                if seen.insert(d.name()) {
                    unit.push(d);
                }
            }
        }
    }
    unit
}

fn conflicts(a: &ContentModule, b: &ContentModule) -> bool {
    a.excludes(b.name()) || b.excludes(a.name())
}

/// Keep a maximal conflict-free subset, preferring higher priority and then
/// the lexicographically smaller name. Either side listing the other is a
/// conflict.
///
/// A module is accepted together with its dependency unit or not at all, so
/// a kept module never loses a dependency to an exclusion.
fn resolve_exclusions(modules: Vec<Arc<ContentModule>>) -> Vec<Arc<ContentModule>> {
    let mut ordered = modules;
    ordered.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| a.name().cmp(b.name()))
    });
    let pool = pool_of(&ordered);

    let mut kept: Vec<&Arc<ContentModule>> = Vec::with_capacity(ordered.len());
    let mut kept_names: HashSet<&str> = HashSet::new();
    for candidate in &ordered {
        if kept_names.contains(candidate.name()) {
            continue;
        }
        let fresh: Vec<&Arc<ContentModule>> = dependency_unit(candidate, &pool)
            .into_iter()
            .filter(|m| !kept_names.contains(m.name()))
            .collect();

        let against_kept = fresh
            .iter()
            .find_map(|m| kept.iter().find(|k| conflicts(m, k)).map(|k| k.name()));
        let within_unit = fresh.iter().enumerate().find_map(|(i, m)| {
            fresh[i + 1..]
                .iter()
                .find(|other| conflicts(m, other))
                .map(|other| other.name())
        });
        if let Some(winner) = against_kept.or(within_unit) {
            debug!(kept = %winner, dropped = %candidate.name(), "Exclusion resolved");
            continue;
        }

        for m in fresh {
            kept_names.insert(m.name());
            kept.push(m);
        }
    }
    kept.into_iter().cloned().collect()
}

/// Select at most `max` modules from an already ranked, dependency-closed
/// list. Each module is taken with its whole dependency unit; a unit that
/// no longer fits is skipped and smaller ones further down may still fill
/// the remaining room. Rank order is preserved.
fn fit_to_limit(ranked: &[Arc<ContentModule>], max: usize) -> Vec<Arc<ContentModule>> {
    let pool = pool_of(ranked);
    let mut chosen: HashSet<&str> = HashSet::new();
    for module in ranked {
        if chosen.len() >= max {
            break;
        }
        if chosen.contains(module.name()) {
            continue;
        }
        let fresh: Vec<&str> = dependency_unit(module, &pool)
            .into_iter()
            .map(|m| m.name())
            .filter(|name| !chosen.contains(name))
            .collect();
        if chosen.len() + fresh.len() <= max {
            chosen.extend(fresh);
        } else {
            debug!(module = %module.name(), unit = fresh.len(), "Module and dependencies exceed the limit");
        }
    }
    ranked
        .iter()
        .filter(|m| chosen.contains(m.name()))
        .cloned()
        .collect()
}

/// Priority descending, then canonical category order, then name.
fn rank(modules: &mut [Arc<ContentModule>]) {
    modules.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| a.category().cmp(&b.category()))
            .then_with(|| a.name().cmp(b.name()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ContentModuleBuilder;
    use crate::types::Category;

    struct Fixture {
        registry: ModuleRegistry,
        index: PatternIndex,
        config: RouterConfig,
    }

    impl Fixture {
        fn new(builders: Vec<ContentModuleBuilder>) -> Self {
            let mut registry = ModuleRegistry::new();
            for b in builders {
                registry.register(b.build().expect("valid module")).expect("unique");
            }
            let index = PatternIndex::build(&registry, 100_000).expect("build");
            Self {
                registry,
                index,
                config: RouterConfig::default(),
            }
        }

        fn router(&self) -> IntentRouter<'_> {
            IntentRouter::new(&self.registry, &self.index, &self.config)
        }
    }

    fn names(decision: &RouteDecision) -> Vec<&str> {
        decision.module_names()
    }

    #[test]
    fn harvest_scenario() {
        let fx = Fixture::new(vec![
            ContentModule::builder("Harvest")
                .category(Category::Skill)
                .priority(10)
                .keyword("harvest")
                .keyword("收割")
                .keyword("reap"),
            ContentModule::builder("CoreIdentity")
                .category(Category::Core)
                .priority(1000)
                .always_active(true),
        ]);
        let decision = fx.router().route("please harvest the rice", &EnvironmentSnapshot::peaceful());
        assert!(decision.is_success());
        assert_eq!(names(&decision), vec!["CoreIdentity", "Harvest"]);
    }

    #[test]
    fn below_threshold_is_ignored() {
        let fx = Fixture::new(vec![ContentModule::builder("Faint").weighted_keyword("maybe", 0.25)]);
        let decision = fx.router().route("maybe", &EnvironmentSnapshot::peaceful());
        assert!(decision.modules.is_empty());
        assert_eq!(decision.matches.len(), 1);
    }

    #[test]
    fn combat_gating() {
        let fx = Fixture::new(vec![
            ContentModule::builder("Tactics").requires_combat(true).keyword("flank"),
            ContentModule::builder("Gardening").requires_peace(true).keyword("flank"),
        ]);
        let router = fx.router();
        assert_eq!(names(&router.route("flank them", &EnvironmentSnapshot::in_combat())), vec!["Tactics"]);
        assert_eq!(names(&router.route("flank them", &EnvironmentSnapshot::peaceful())), vec!["Gardening"]);
    }

    #[test]
    fn dependencies_are_pulled_in_transitively() {
        let fx = Fixture::new(vec![
            ContentModule::builder("Harvest").priority(10).keyword("harvest").dependency("Tools"),
            ContentModule::builder("Tools").priority(5).dependency("Format"),
            ContentModule::builder("Format").category(Category::FormatSpec).priority(800),
        ]);
        let decision = fx.router().route("harvest", &EnvironmentSnapshot::peaceful());
        assert_eq!(names(&decision), vec!["Format", "Harvest", "Tools"]);
    }

    #[test]
    fn gated_dependency_is_dropped_with_its_edges() {
        let fx = Fixture::new(vec![
            ContentModule::builder("Harvest").keyword("harvest").dependency("Battle"),
            ContentModule::builder("Battle").requires_combat(true).dependency("Armor"),
            ContentModule::builder("Armor"),
        ]);
        let decision = fx.router().route("harvest", &EnvironmentSnapshot::peaceful());
        assert_eq!(names(&decision), vec!["Harvest"]);
    }

    #[test]
    fn dependency_cycles_terminate() {
        let fx = Fixture::new(vec![
            ContentModule::builder("A").keyword("alpha").dependency("B"),
            ContentModule::builder("B").dependency("C"),
            ContentModule::builder("C").dependency("A"),
        ]);
        let decision = fx.router().route("alpha", &EnvironmentSnapshot::peaceful());
        assert_eq!(names(&decision), vec!["A", "B", "C"]);
    }

    #[test]
    fn exclusion_keeps_higher_priority() {
        let fx = Fixture::new(vec![
            ContentModule::builder("X").priority(5).keyword("storm").exclusive_with("Y"),
            ContentModule::builder("Y").priority(10).keyword("storm"),
        ]);
        let decision = fx.router().route("storm", &EnvironmentSnapshot::peaceful());
        assert_eq!(names(&decision), vec!["Y"]);
    }

    #[test]
    fn exclusion_tie_breaks_by_name() {
        let fx = Fixture::new(vec![
            ContentModule::builder("Beta").keyword("storm").exclusive_with("Alpha"),
            ContentModule::builder("Alpha").keyword("storm"),
        ]);
        let decision = fx.router().route("storm", &EnvironmentSnapshot::peaceful());
        assert_eq!(names(&decision), vec!["Alpha"]);
    }

    #[test]
    fn exclusion_of_a_dependency_drops_the_weaker_side() {
        let fx = Fixture::new(vec![
            ContentModule::builder("Siege").priority(10).keyword("go").dependency("Ladders"),
            ContentModule::builder("Ladders").priority(1),
            ContentModule::builder("Parley").priority(5).keyword("go").exclusive_with("Ladders"),
        ]);
        let decision = fx.router().route("go", &EnvironmentSnapshot::peaceful());
        assert_eq!(names(&decision), vec!["Siege", "Ladders"]);
    }

    #[test]
    fn dependent_loses_when_its_dependency_is_outranked() {
        let fx = Fixture::new(vec![
            ContentModule::builder("Siege").priority(5).keyword("go").dependency("Ladders"),
            ContentModule::builder("Ladders").priority(1),
            ContentModule::builder("Parley").priority(10).keyword("go").exclusive_with("Ladders"),
        ]);
        let decision = fx.router().route("go", &EnvironmentSnapshot::peaceful());
        assert_eq!(names(&decision), vec!["Parley"]);
    }

    #[test]
    fn module_excluding_its_own_dependency_is_dropped() {
        let fx = Fixture::new(vec![
            ContentModule::builder("Odd")
                .priority(10)
                .keyword("go")
                .dependency("Base")
                .exclusive_with("Base"),
            ContentModule::builder("Base").priority(1).keyword("go"),
        ]);
        let decision = fx.router().route("go", &EnvironmentSnapshot::peaceful());
        assert_eq!(names(&decision), vec!["Base"]);
    }

    #[test]
    fn truncation_keeps_dependencies_with_their_dependent() {
        let mut builders = vec![
            ContentModule::builder("Siege").priority(10).keyword("go").dependency("Ladders"),
            ContentModule::builder("Ladders").priority(1),
        ];
        for i in 0..10 {
            builders.push(ContentModule::builder(format!("Filler{i}")).priority(5).keyword("go"));
        }
        let fx = Fixture::new(builders);
        let decision = fx.router().route("go", &EnvironmentSnapshot::peaceful());
        let got = names(&decision);
        assert_eq!(got.len(), 10);
        assert_eq!(got[0], "Siege");
        assert_eq!(got[9], "Ladders");
        assert!(!got.contains(&"Filler8"));
        assert!(!got.contains(&"Filler9"));
    }

    #[test]
    fn unit_larger_than_limit_is_skipped() {
        let mut fx = Fixture::new(vec![
            ContentModule::builder("Chain").priority(10).keyword("go").dependency("Link1"),
            ContentModule::builder("Link1").priority(1).dependency("Link2"),
            ContentModule::builder("Link2").priority(1),
            ContentModule::builder("Solo").priority(5).keyword("go"),
        ]);
        fx.config.max_modules = 2;
        let decision = fx.router().route("go", &EnvironmentSnapshot::peaceful());
        let got = names(&decision);
        assert!(got.len() <= 2);
        assert!(!got.contains(&"Chain"));
        assert_eq!(got[0], "Solo");
        for module in &decision.modules {
            for dep in module.dependencies() {
                assert!(got.contains(&dep.as_str()), "{} kept without {dep}", module.name());
            }
        }
    }

    #[test]
    fn ranking_uses_category_on_priority_tie_and_truncates() {
        let mut builders = vec![
            ContentModule::builder("Mem").category(Category::Memory).priority(50).keyword("go"),
            ContentModule::builder("Ctx")
                .category(Category::SituationalContext)
                .priority(50)
                .keyword("go"),
        ];
        for i in 0..12 {
            builders.push(ContentModule::builder(format!("Filler{i:02}")).priority(1).keyword("go"));
        }
        let fx = Fixture::new(builders);
        let decision = fx.router().route("go", &EnvironmentSnapshot::peaceful());
        assert_eq!(decision.modules.len(), 10);
        assert_eq!(&names(&decision)[..3], &["Ctx", "Mem", "Filler00"]);
    }

    #[test]
    fn route_by_intents_matches_case_insensitively() {
        let fx = Fixture::new(vec![
            ContentModule::builder("Harvest").intent("Harvest"),
            ContentModule::builder("Build").intent("Build"),
            ContentModule::builder("Core").always_active(true).priority(1000),
        ]);
        let decision = fx.router().route_by_intents(&["harvest"], &EnvironmentSnapshot::peaceful());
        assert_eq!(names(&decision), vec!["Core", "Harvest"]);
    }

    #[test]
    fn force_route_bypasses_gating_but_not_exclusion() {
        let fx = Fixture::new(vec![
            ContentModule::builder("Tactics").requires_combat(true).priority(10).dependency("Maps"),
            ContentModule::builder("Maps").requires_combat(true).priority(5),
            ContentModule::builder("Truce").priority(1).exclusive_with("Tactics"),
        ]);
        let decision = fx
            .router()
            .force_route(&["Tactics", "Truce", "Ghost"], &EnvironmentSnapshot::peaceful());
        assert_eq!(names(&decision), vec!["Tactics", "Maps"]);
    }

    #[test]
    fn unregistered_match_is_route_failure() {
        let fx = Fixture::new(vec![ContentModule::builder("Harvest").keyword("harvest")]);
        let empty = ModuleRegistry::new();
        let router = IntentRouter::new(&empty, &fx.index, &fx.config);
        let decision = router.route("harvest", &EnvironmentSnapshot::peaceful());
        assert!(!decision.is_success());
        assert!(decision.modules.is_empty());
        assert!(decision.debug_report().contains("FAILED"));
    }

    #[test]
    fn decision_serializes_module_names() {
        let fx = Fixture::new(vec![ContentModule::builder("Harvest").keyword("harvest")]);
        let decision = fx.router().route("harvest", &EnvironmentSnapshot::peaceful());
        let json = serde_json::to_value(&decision).expect("serializes");
        assert_eq!(json["modules"], serde_json::json!(["Harvest"]));
    }
}
