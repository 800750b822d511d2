//! Module definition ingestion.
//!
//! Definitions are plain deserialised records ([`ModuleDefinition`]) read
//! from one or more [`DefinitionSource`]s. Converting a record into a
//! [`ContentModule`] is where validation happens; the registry decides what
//! to do with failures.
//!
//! Two source kinds exist. Structured sources (TOML / JSON files, in-memory
//! lists) are authoritative. Loose sources ([`frontmatter::PromptDirectorySource`])
//! only fill in names no structured source has claimed.

pub mod frontmatter;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::module::{BodyResolver, ContentModule, DEFAULT_PRIORITY};
use crate::types::Category;

pub use frontmatter::PromptDirectorySource;

// ---------------------------------------------------------------------------
// ModuleDefinition
// ---------------------------------------------------------------------------

/// One module record as it appears in an external definition file.
///
/// Field names are `snake_case`; the camelCase spellings are accepted as
/// aliases so definitions exported by other tools load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    /// Unique module name.
    #[serde(alias = "defName")]
    pub name: String,
    /// Display label.
    #[serde(default)]
    pub label: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Category (defaults to `Skill`).
    #[serde(default, alias = "moduleType")]
    pub category: Category,
    /// Ordering priority.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Bypass matching entirely.
    #[serde(default, alias = "alwaysActive")]
    pub always_active: bool,
    /// Only eligible in combat.
    #[serde(default, alias = "requiresCombatState", alias = "requires_combat")]
    pub requires_combat_state: bool,
    /// Only eligible outside combat.
    #[serde(default, alias = "requiresPeaceState", alias = "requires_peace")]
    pub requires_peace_state: bool,
    /// Intent labels.
    #[serde(default, alias = "triggerIntents")]
    pub trigger_intents: Vec<String>,
    /// Surface-form keywords.
    #[serde(default, alias = "expandedKeywords")]
    pub expanded_keywords: Vec<String>,
    /// Per-keyword weights (default 1.0). Keys not listed in
    /// `expanded_keywords` are added as keywords.
    #[serde(default, alias = "keywordWeights")]
    pub keyword_weights: BTreeMap<String, f32>,
    /// Modules that must accompany this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Modules that cannot co-exist with this one.
    #[serde(default, alias = "exclusiveWith")]
    pub exclusive_with: Vec<String>,
    /// Body is a `{name}` template.
    #[serde(default)]
    pub templated: bool,
    /// Inline body text.
    #[serde(default, alias = "content")]
    pub body: Option<String>,
    /// External body reference resolved through a [`BodyResolver`].
    #[serde(default, alias = "bodyRef")]
    pub body_ref: Option<String>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl ModuleDefinition {
    /// A minimal definition with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            description: String::new(),
            category: Category::default(),
            priority: DEFAULT_PRIORITY,
            always_active: false,
            requires_combat_state: false,
            requires_peace_state: false,
            trigger_intents: Vec::new(),
            expanded_keywords: Vec::new(),
            keyword_weights: BTreeMap::new(),
            dependencies: Vec::new(),
            exclusive_with: Vec::new(),
            templated: false,
            body: None,
            body_ref: None,
        }
    }

    /// Validate and convert into a [`ContentModule`].
    ///
    /// An inline `body` takes precedence over `body_ref`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedDefinition`] for an empty name, an
    /// invalid keyword weight, or a `body_ref` with no resolver available.
    pub fn into_module(self, resolver: Option<&Arc<dyn BodyResolver>>) -> Result<ContentModule> {
        let mut builder = ContentModule::builder(self.name.clone())
            .description(self.description)
            .category(self.category)
            .priority(self.priority)
            .always_active(self.always_active)
            .requires_combat(self.requires_combat_state)
            .requires_peace(self.requires_peace_state)
            .templated(self.templated);

        if let Some(label) = self.label {
            builder = builder.label(label);
        }
        for intent in self.trigger_intents {
            let intent = intent.trim();
            if !intent.is_empty() {
                builder = builder.intent(intent);
            }
        }
        for keyword in &self.expanded_keywords {
            let weight = self.keyword_weights.get(keyword).copied().unwrap_or(1.0);
            builder = builder.weighted_keyword(keyword.clone(), weight);
        }
        for (keyword, weight) in &self.keyword_weights {
            if !self.expanded_keywords.contains(keyword) {
                builder = builder.weighted_keyword(keyword.clone(), *weight);
            }
        }
        for dep in self.dependencies {
            builder = builder.dependency(dep);
        }
        for excl in self.exclusive_with {
            builder = builder.exclusive_with(excl);
        }

        builder = match (self.body, self.body_ref) {
            (Some(body), _) => builder.body(body),
            (None, Some(reference)) => {
                let resolver = resolver.ok_or_else(|| {
                    EngineError::malformed(
                        &self.name,
                        format!("body_ref '{reference}' given but no body resolver is configured"),
                    )
                })?;
                builder.body_ref(reference, Arc::clone(resolver))
            }
            (None, None) => builder,
        };

        builder.build()
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// How a source's definitions interact with others of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Authoritative. A repeated name is a `DuplicateModuleName` error.
    Structured,
    /// Fallback. A name already registered is silently skipped.
    Loose,
}

/// Anything that can produce module definitions.
///
/// Sources are re-read on every reload, so implementations should not cache.
pub trait DefinitionSource: Send + Sync {
    /// Human-readable label for logs.
    fn label(&self) -> String;

    /// Precedence class.
    fn kind(&self) -> SourceKind;

    /// Read every definition this source currently holds.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Source`] or [`EngineError::Io`] when the
    /// source as a whole cannot be read. Per-record problems are reported
    /// later, at conversion time.
    fn load(&self) -> Result<Vec<ModuleDefinition>>;

    /// Read every record, keeping per-record failures apart so one bad
    /// record does not cost the rest of the source.
    ///
    /// The default wraps [`DefinitionSource::load`], for sources whose
    /// records cannot fail individually.
    ///
    /// # Errors
    ///
    /// Same as [`DefinitionSource::load`].
    fn load_records(&self) -> Result<Vec<Result<ModuleDefinition>>> {
        Ok(self.load()?.into_iter().map(Ok).collect())
    }
}

/// Definitions held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    definitions: Vec<ModuleDefinition>,
}

impl StaticSource {
    /// Wrap a list of definitions.
    #[must_use]
    pub fn new(definitions: Vec<ModuleDefinition>) -> Self {
        Self { definitions }
    }
}

impl DefinitionSource for StaticSource {
    fn label(&self) -> String {
        format!("static({} definitions)", self.definitions.len())
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Structured
    }

    fn load(&self) -> Result<Vec<ModuleDefinition>> {
        Ok(self.definitions.clone())
    }
}

/// A structured definitions file.
///
/// `.json` files hold either an array of records or `{"module": [...]}`;
/// anything else is parsed as TOML with `[[module]]` tables.
#[derive(Debug, Clone)]
pub struct StructuredFileSource {
    path: PathBuf,
}

impl StructuredFileSource {
    /// Read definitions from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse structured definitions from text, choosing the format by
    /// `path`'s extension. Strict: the first bad record fails the whole call.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Source`] if the text does not parse and
    /// [`EngineError::MalformedDefinition`] for the first bad record.
    pub fn parse(path: &Path, text: &str) -> Result<Vec<ModuleDefinition>> {
        Self::parse_records(path, text)?.into_iter().collect()
    }

    /// Parse structured definitions record by record.
    ///
    /// The document itself must be well formed; each `module` entry is then
    /// deserialised on its own and a bad one becomes an
    /// [`EngineError::MalformedDefinition`] in its slot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Source`] if the text does not parse or the
    /// `module` list has the wrong shape.
    pub fn parse_records(path: &Path, text: &str) -> Result<Vec<Result<ModuleDefinition>>> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let source_err = |reason: String| EngineError::Source {
            source_name: path.display().to_string(),
            reason,
        };

        if is_json {
            let value: serde_json::Value =
                serde_json::from_str(text).map_err(|e| source_err(e.to_string()))?;
            let items = match value {
                serde_json::Value::Array(items) => items,
                serde_json::Value::Object(mut map) => match map.remove("module") {
                    Some(serde_json::Value::Array(items)) => items,
                    None => Vec::new(),
                    Some(_) => return Err(source_err("\"module\" must be an array".to_string())),
                },
                _ => return Err(source_err("expected an array or an object".to_string())),
            };
            Ok(items
                .into_iter()
                .map(|item| {
                    let hint = record_name(
                        item.get("name")
                            .or_else(|| item.get("defName"))
                            .and_then(serde_json::Value::as_str),
                    );
                    serde_json::from_value::<ModuleDefinition>(item)
                        .map_err(|e| EngineError::malformed(hint, e.to_string()))
                })
                .collect())
        } else {
            let mut table: toml::Table = toml::from_str(text).map_err(|e| source_err(e.to_string()))?;
            let items = match table.remove("module") {
                Some(toml::Value::Array(items)) => items,
                None => Vec::new(),
                Some(_) => return Err(source_err("`module` must be an array of tables".to_string())),
            };
            Ok(items
                .into_iter()
                .map(|item| {
                    let hint = record_name(
                        item.get("name")
                            .or_else(|| item.get("defName"))
                            .and_then(toml::Value::as_str),
                    );
                    ModuleDefinition::deserialize(item).map_err(|e| EngineError::malformed(hint, e.to_string()))
                })
                .collect())
        }
    }
}

fn record_name(name: Option<&str>) -> String {
    name.map_or_else(|| "<unnamed>".to_string(), ToString::to_string)
}

impl DefinitionSource for StructuredFileSource {
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Structured
    }

    fn load(&self) -> Result<Vec<ModuleDefinition>> {
        let text = std::fs::read_to_string(&self.path)?;
        Self::parse(&self.path, &text)
    }

    fn load_records(&self) -> Result<Vec<Result<ModuleDefinition>>> {
        let text = std::fs::read_to_string(&self.path)?;
        Self::parse_records(&self.path, &text)
    }
}
