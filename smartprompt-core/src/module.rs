//! Content module definitions.
//!
//! A [`ContentModule`] is immutable once built. Its body is resolved lazily
//! on first use and cached for the lifetime of the module; a reload builds
//! fresh modules rather than mutating these.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tracing::warn;

use crate::error::{EngineError, Result};
use crate::types::{Category, EnvironmentSnapshot};

/// Default priority for modules that do not declare one.
pub const DEFAULT_PRIORITY: i32 = 100;

// ---------------------------------------------------------------------------
// Body resolution
// ---------------------------------------------------------------------------

/// Resolve an external body reference to its text.
///
/// Implementations must be cheap to share; the engine keeps one per
/// registry generation.
pub trait BodyResolver: Send + Sync {
    /// Load the text for `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference does not exist or cannot be read.
    fn resolve(&self, reference: &str) -> Result<String>;
}

/// Resolves references against `<dir>/<stem>.txt` or `<dir>/<stem>.md`.
///
/// Any path prefix or extension on the reference is stripped first, so
/// `"Prompts/Module_Farming.txt"` and `"Module_Farming"` are equivalent.
#[derive(Debug, Clone)]
pub struct DirectoryBodyResolver {
    dir: PathBuf,
}

impl DirectoryBodyResolver {
    /// Create a resolver rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl BodyResolver for DirectoryBodyResolver {
    fn resolve(&self, reference: &str) -> Result<String> {
        let stem = Path::new(reference)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::Source {
                source_name: self.dir.display().to_string(),
                reason: format!("invalid body reference '{reference}'"),
            })?;

        for ext in ["txt", "md"] {
            let path = self.dir.join(format!("{stem}.{ext}"));
            if path.is_file() {
                return Ok(std::fs::read_to_string(&path)?);
            }
        }

        Err(EngineError::Source {
            source_name: self.dir.display().to_string(),
            reason: format!("no body file for reference '{reference}'"),
        })
    }
}

/// Resolves references from an in-memory table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBodyResolver {
    bodies: HashMap<String, String>,
}

impl InMemoryBodyResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a body under `reference`.
    #[must_use]
    pub fn with_body(mut self, reference: impl Into<String>, body: impl Into<String>) -> Self {
        self.bodies.insert(reference.into(), body.into());
        self
    }
}

impl BodyResolver for InMemoryBodyResolver {
    fn resolve(&self, reference: &str) -> Result<String> {
        self.bodies
            .get(reference)
            .cloned()
            .ok_or_else(|| EngineError::Source {
                source_name: "in-memory".to_string(),
                reason: format!("no body registered for '{reference}'"),
            })
    }
}

/// Where a module's body text comes from.
#[derive(Clone)]
pub enum BodySource {
    /// No body at all.
    Empty,
    /// Text carried by the definition itself.
    Inline(String),
    /// Text loaded on first use through a resolver.
    Reference {
        /// Resource name handed to the resolver.
        reference: String,
        /// Resolver used to load it.
        resolver: Arc<dyn BodyResolver>,
    },
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Inline(text) => write!(f, "Inline({} chars)", text.chars().count()),
            Self::Reference { reference, .. } => write!(f, "Reference({reference})"),
        }
    }
}

// ---------------------------------------------------------------------------
// ContentModule
// ---------------------------------------------------------------------------

/// A surface-form keyword with its score contribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// Keyword text as declared (matching lowercases it).
    pub text: String,
    /// Score contributed per occurrence.
    pub weight: f32,
}

/// A named, metadata-tagged unit of prompt content.
#[derive(Debug)]
pub struct ContentModule {
    name: String,
    label: String,
    description: String,
    category: Category,
    priority: i32,
    trigger_intents: Vec<String>,
    keywords: Vec<Keyword>,
    always_active: bool,
    requires_combat_state: bool,
    requires_peace_state: bool,
    dependencies: BTreeSet<String>,
    exclusive_with: BTreeSet<String>,
    templated: bool,
    body_source: BodySource,
    body_cache: OnceLock<String>,
    inert_reason: Option<String>,
}

impl ContentModule {
    /// Start building a module named `name`.
    pub fn builder(name: impl Into<String>) -> ContentModuleBuilder {
        ContentModuleBuilder::new(name)
    }

    /// Unique module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display label (defaults to the name).
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Free-form description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Module category.
    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    /// Ordering priority (higher first).
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Intent labels this module answers to.
    #[must_use]
    pub fn trigger_intents(&self) -> &[String] {
        &self.trigger_intents
    }

    /// Expanded keywords with weights.
    #[must_use]
    pub fn keywords(&self) -> &[Keyword] {
        &self.keywords
    }

    /// Whether the module bypasses matching.
    #[must_use]
    pub fn always_active(&self) -> bool {
        self.always_active
    }

    /// Whether the module is only eligible in combat.
    #[must_use]
    pub fn requires_combat_state(&self) -> bool {
        self.requires_combat_state
    }

    /// Whether the module is only eligible outside combat.
    #[must_use]
    pub fn requires_peace_state(&self) -> bool {
        self.requires_peace_state
    }

    /// Modules pulled in whenever this one is included.
    #[must_use]
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Modules that cannot co-exist with this one.
    #[must_use]
    pub fn exclusive_with(&self) -> &BTreeSet<String> {
        &self.exclusive_with
    }

    /// Whether the body is a template.
    #[must_use]
    pub fn templated(&self) -> bool {
        self.templated
    }

    /// Why this module can never activate, if its metadata is contradictory.
    #[must_use]
    pub fn inert_reason(&self) -> Option<&str> {
        self.inert_reason.as_deref()
    }

    /// Whether this module excludes `other` (by name).
    #[must_use]
    pub fn excludes(&self, other: &str) -> bool {
        self.exclusive_with.contains(other)
    }

    /// Gating rule against the current environment.
    #[must_use]
    pub fn can_activate(&self, env: &EnvironmentSnapshot) -> bool {
        if self.inert_reason.is_some() {
            return false;
        }
        if self.always_active {
            return true;
        }
        if self.requires_combat_state && !env.is_in_combat {
            return false;
        }
        if self.requires_peace_state && env.is_in_combat {
            return false;
        }
        true
    }

    /// Raw body text, resolving and caching it on first access.
    ///
    /// A failed resolution is logged and yields an empty body; it is not
    /// retried until the registry is reloaded.
    pub fn body(&self) -> &str {
        self.body_cache.get_or_init(|| match &self.body_source {
            BodySource::Empty => String::new(),
            BodySource::Inline(text) => text.clone(),
            BodySource::Reference {
                reference,
                resolver,
            } => match resolver.resolve(reference) {
                Ok(text) => text,
                Err(e) => {
                    warn!(module = %self.name, reference = %reference, error = %e, "Failed to resolve module body");
                    String::new()
                }
            },
        })
    }

    /// One-line diagnostic summary.
    #[must_use]
    pub fn debug_info(&self) -> String {
        let deps: Vec<&str> = self.dependencies.iter().map(String::as_str).collect();
        format!(
            "[{}] Category={}, Priority={}, Intents=[{}], Keywords={}, AlwaysActive={}, Dependencies=[{}]",
            self.name,
            self.category,
            self.priority,
            self.trigger_intents.join(", "),
            self.keywords.len(),
            self.always_active,
            deps.join(", ")
        )
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Validating builder for [`ContentModule`].
#[derive(Debug)]
pub struct ContentModuleBuilder {
    name: String,
    label: Option<String>,
    description: String,
    category: Category,
    priority: i32,
    trigger_intents: Vec<String>,
    keywords: Vec<Keyword>,
    always_active: bool,
    requires_combat_state: bool,
    requires_peace_state: bool,
    dependencies: BTreeSet<String>,
    exclusive_with: BTreeSet<String>,
    templated: bool,
    body_source: BodySource,
}

impl ContentModuleBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            description: String::new(),
            category: Category::default(),
            priority: DEFAULT_PRIORITY,
            trigger_intents: Vec::new(),
            keywords: Vec::new(),
            always_active: false,
            requires_combat_state: false,
            requires_peace_state: false,
            dependencies: BTreeSet::new(),
            exclusive_with: BTreeSet::new(),
            templated: false,
            body_source: BodySource::Empty,
        }
    }

    /// Set the display label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the category.
    #[must_use]
    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a trigger intent. Duplicates that differ only in case or
    /// surrounding whitespace are ignored; the first spelling is kept.
    #[must_use]
    pub fn intent(mut self, intent: impl Into<String>) -> Self {
        let intent = intent.into();
        let key = match_key(&intent);
        if !self.trigger_intents.iter().any(|i| match_key(i) == key) {
            self.trigger_intents.push(intent);
        }
        self
    }

    /// Add a keyword with weight 1.0.
    #[must_use]
    pub fn keyword(self, text: impl Into<String>) -> Self {
        self.weighted_keyword(text, 1.0)
    }

    /// Add a keyword with an explicit weight. Keywords are compared the way
    /// the matcher sees them (trimmed, lowercased), so a repeat keeps the
    /// first spelling and the last weight given.
    #[must_use]
    pub fn weighted_keyword(mut self, text: impl Into<String>, weight: f32) -> Self {
        let text = text.into();
        let key = match_key(&text);
        if let Some(existing) = self.keywords.iter_mut().find(|k| match_key(&k.text) == key) {
            existing.weight = weight;
        } else {
            self.keywords.push(Keyword { text, weight });
        }
        self
    }

    /// Mark the module as always active.
    #[must_use]
    pub fn always_active(mut self, always_active: bool) -> Self {
        self.always_active = always_active;
        self
    }

    /// Require the combat state.
    #[must_use]
    pub fn requires_combat(mut self, required: bool) -> Self {
        self.requires_combat_state = required;
        self
    }

    /// Require the peace state.
    #[must_use]
    pub fn requires_peace(mut self, required: bool) -> Self {
        self.requires_peace_state = required;
        self
    }

    /// Add a dependency.
    #[must_use]
    pub fn dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.insert(name.into());
        self
    }

    /// Add a mutual exclusion.
    #[must_use]
    pub fn exclusive_with(mut self, name: impl Into<String>) -> Self {
        self.exclusive_with.insert(name.into());
        self
    }

    /// Mark the body as a template.
    #[must_use]
    pub fn templated(mut self, templated: bool) -> Self {
        self.templated = templated;
        self
    }

    /// Use inline body text.
    #[must_use]
    pub fn body(mut self, text: impl Into<String>) -> Self {
        self.body_source = BodySource::Inline(text.into());
        self
    }

    /// Resolve the body lazily through `resolver`.
    #[must_use]
    pub fn body_ref(mut self, reference: impl Into<String>, resolver: Arc<dyn BodyResolver>) -> Self {
        self.body_source = BodySource::Reference {
            reference: reference.into(),
            resolver,
        };
        self
    }

    /// Validate and build the module.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedDefinition`] for an empty name or a
    /// negative / non-finite keyword weight. Self-references and
    /// combat+peace contradictions are not errors: the module is built
    /// inert and a warning is logged.
    pub fn build(self) -> Result<ContentModule> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::malformed("", "module name is empty"));
        }

        if let Some(bad) = self
            .keywords
            .iter()
            .find(|k| !k.weight.is_finite() || k.weight < 0.0)
        {
            return Err(EngineError::malformed(
                &name,
                format!("keyword '{}' has invalid weight {}", bad.text, bad.weight),
            ));
        }

        let inert_reason = if self.requires_combat_state && self.requires_peace_state {
            Some("requires both combat and peace".to_string())
        } else if self.dependencies.contains(&name) {
            Some("lists itself as a dependency".to_string())
        } else if self.exclusive_with.contains(&name) {
            Some("lists itself as exclusive".to_string())
        } else {
            None
        };

        if let Some(ref reason) = inert_reason {
            warn!(module = %name, reason = %reason, "Contradictory module metadata; module will never activate");
        }

        Ok(ContentModule {
            label: self.label.unwrap_or_else(|| name.clone()),
            name,
            description: self.description,
            category: self.category,
            priority: self.priority,
            trigger_intents: self.trigger_intents,
            keywords: self.keywords,
            always_active: self.always_active,
            requires_combat_state: self.requires_combat_state,
            requires_peace_state: self.requires_peace_state,
            dependencies: self.dependencies,
            exclusive_with: self.exclusive_with,
            templated: self.templated,
            body_source: self.body_source,
            body_cache: OnceLock::new(),
            inert_reason,
        })
    }
}

/// Normalised form used by the matcher.
fn match_key(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn gating_rules() {
        let combat = ContentModule::builder("Tactics")
            .requires_combat(true)
            .build()
            .expect("build");
        let peace = ContentModule::builder("Farming")
            .requires_peace(true)
            .build()
            .expect("build");
        let free = ContentModule::builder("Chat").build().expect("build");

        let at_war = EnvironmentSnapshot::in_combat();
        let at_peace = EnvironmentSnapshot::peaceful();

        assert!(combat.can_activate(&at_war));
        assert!(!combat.can_activate(&at_peace));
        assert!(!peace.can_activate(&at_war));
        assert!(peace.can_activate(&at_peace));
        assert!(free.can_activate(&at_war));
        assert!(free.can_activate(&at_peace));
    }

    #[test]
    fn always_active_bypasses_gating() {
        let module = ContentModule::builder("Identity")
            .always_active(true)
            .requires_combat(true)
            .build()
            .expect("build");
        assert!(module.can_activate(&EnvironmentSnapshot::peaceful()));
    }

    #[test]
    fn contradictory_gating_is_inert() {
        let module = ContentModule::builder("Confused")
            .always_active(true)
            .requires_combat(true)
            .requires_peace(true)
            .build()
            .expect("contradictions are not build errors");
        assert!(module.inert_reason().is_some());
        assert!(!module.can_activate(&EnvironmentSnapshot::peaceful()));
        assert!(!module.can_activate(&EnvironmentSnapshot::in_combat()));
    }

    #[test]
    fn self_reference_is_inert() {
        let dep = ContentModule::builder("Loop")
            .dependency("Loop")
            .build()
            .expect("build");
        let excl = ContentModule::builder("Lonely")
            .exclusive_with("Lonely")
            .build()
            .expect("build");
        assert!(!dep.can_activate(&EnvironmentSnapshot::peaceful()));
        assert!(!excl.can_activate(&EnvironmentSnapshot::peaceful()));
    }

    #[test]
    fn keywords_and_intents_dedupe_ignoring_case() {
        let module = ContentModule::builder("Harvest")
            .intent("Harvest")
            .intent(" harvest ")
            .keyword("Reap")
            .weighted_keyword("reap", 2.5)
            .keyword("sow")
            .build()
            .expect("build");
        assert_eq!(module.trigger_intents(), ["Harvest"]);
        assert_eq!(module.keywords().len(), 2);
        assert_eq!(module.keywords()[0].text, "Reap");
        assert!((module.keywords()[0].weight - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_weights_rejected() {
        for weight in [f32::NAN, f32::INFINITY, -1.0] {
            let result = ContentModule::builder("Bad")
                .weighted_keyword("oops", weight)
                .build();
            assert!(matches!(
                result,
                Err(EngineError::MalformedDefinition { .. })
            ));
        }
    }

    #[test]
    fn empty_name_rejected() {
        assert!(ContentModule::builder("   ").build().is_err());
    }

    #[test]
    fn repeated_keyword_keeps_last_weight() {
        let module = ContentModule::builder("Farming")
            .weighted_keyword("crop", 0.5)
            .weighted_keyword("crop", 2.0)
            .build()
            .expect("build");
        assert_eq!(module.keywords().len(), 1);
        assert!((module.keywords()[0].weight - 2.0).abs() < f32::EPSILON);
    }

    struct CountingResolver {
        calls: AtomicUsize,
    }

    impl BodyResolver for CountingResolver {
        fn resolve(&self, reference: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("body of {reference}"))
        }
    }

    #[test]
    fn body_reference_resolved_once() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let module = ContentModule::builder("Farming")
            .body_ref("Module_Farming", resolver.clone())
            .build()
            .expect("build");

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(module.body(), "body of Module_Farming");
        assert_eq!(module.body(), "body of Module_Farming");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_body_reference_yields_empty() {
        let module = ContentModule::builder("Ghost")
            .body_ref("nowhere", Arc::new(InMemoryBodyResolver::new()))
            .build()
            .expect("build");
        assert_eq!(module.body(), "");
    }

    #[test]
    fn directory_resolver_strips_prefix_and_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Module_Farming.txt"), "Sow in spring.").expect("write");

        let resolver = DirectoryBodyResolver::new(dir.path());
        assert_eq!(
            resolver.resolve("Prompts/Module_Farming.txt").expect("resolve"),
            "Sow in spring."
        );
        assert_eq!(
            resolver.resolve("Module_Farming").expect("resolve"),
            "Sow in spring."
        );
        assert!(resolver.resolve("Module_Missing").is_err());
    }
}
