//! The authoritative set of content modules.
//!
//! A registry is built once, in local scope, and never mutated after it is
//! published to readers. Reloading builds a fresh registry from scratch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::definition::{DefinitionSource, SourceKind};
use crate::error::{EngineError, Result};
use crate::module::{BodyResolver, ContentModule};

/// Outcome counts from loading definition sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Sources consulted.
    pub sources: usize,
    /// Sources that could not be read at all.
    pub failed_sources: usize,
    /// Modules registered.
    pub registered: usize,
    /// Definitions skipped because their name is disabled.
    pub disabled: usize,
    /// Loose definitions shadowed by an existing module.
    pub shadowed: usize,
    /// Structured definitions rejected as duplicates.
    pub duplicates: usize,
    /// Definitions rejected as malformed.
    pub malformed: usize,
}

/// Name-keyed module store.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<ContentModule>>,
    /// Registration order, for stable iteration.
    order: Vec<Arc<ContentModule>>,
}

impl ModuleRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateModuleName`] if the name is taken.
    pub fn register(&mut self, module: ContentModule) -> Result<()> {
        if self.modules.contains_key(module.name()) {
            return Err(EngineError::DuplicateModuleName(module.name().to_string()));
        }
        let module = Arc::new(module);
        self.modules
            .insert(module.name().to_string(), Arc::clone(&module));
        self.order.push(module);
        Ok(())
    }

    /// Look up a module by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ContentModule>> {
        self.modules.get(name)
    }

    /// Whether a module with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// All modules in registration order.
    pub fn all_modules(&self) -> impl Iterator<Item = &Arc<ContentModule>> + '_ {
        self.order.iter()
    }

    /// Modules flagged `always_active`, in registration order.
    pub fn always_active(&self) -> impl Iterator<Item = &Arc<ContentModule>> + '_ {
        self.order.iter().filter(|m| m.always_active())
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Build a registry from definition sources.
    ///
    /// Every structured source is consulted before any loose one, each kind
    /// in the order given, so a structured definition wins a name regardless
    /// of where its source sits in `sources`. Unreadable sources and bad
    /// records are logged and skipped. A loose definition whose name is
    /// already registered is shadowed silently; a repeated structured name
    /// is logged as a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoModulesLoaded`] if nothing was registered.
    pub fn load(
        sources: &[Box<dyn DefinitionSource>],
        resolver: Option<&Arc<dyn BodyResolver>>,
        disabled: &[String],
    ) -> Result<(Self, LoadReport)> {
        let disabled: HashSet<&str> = disabled.iter().map(String::as_str).collect();
        let mut registry = Self::new();
        let mut report = LoadReport {
            sources: sources.len(),
            ..LoadReport::default()
        };

        let structured = sources.iter().filter(|s| s.kind() == SourceKind::Structured);
        let loose = sources.iter().filter(|s| s.kind() == SourceKind::Loose);

        for source in structured.chain(loose) {
            let label = source.label();
            let records = match source.load_records() {
                Ok(records) => records,
                Err(e) => {
                    warn!(source = %label, error = %e, "Definition source failed, skipping");
                    report.failed_sources += 1;
                    continue;
                }
            };
            debug!(source = %label, count = records.len(), "Read module definitions");

            for record in records {
                let def = match record {
                    Ok(def) => def,
                    Err(e) => {
                        warn!(source = %label, error = %e, "Unreadable module record, skipping");
                        report.malformed += 1;
                        continue;
                    }
                };
                if disabled.contains(def.name.trim()) {
                    report.disabled += 1;
                    continue;
                }
                if registry.contains(def.name.trim()) {
                    match source.kind() {
                        SourceKind::Loose => report.shadowed += 1,
                        SourceKind::Structured => {
                            warn!(source = %label, module = %def.name, "Duplicate module name, skipping");
                            report.duplicates += 1;
                        }
                    }
                    continue;
                }

                let module = match def.into_module(resolver) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(source = %label, error = %e, "Malformed module definition, skipping");
                        report.malformed += 1;
                        continue;
                    }
                };
                // Name uniqueness was checked above.
                if let Err(e) = registry.register(module) {
                    warn!(source = %label, error = %e, "Module registration failed");
                    report.duplicates += 1;
                    continue;
                }
                report.registered += 1;
            }
        }

        if registry.is_empty() {
            return Err(EngineError::NoModulesLoaded {
                sources: sources.len(),
            });
        }

        info!(
            modules = report.registered,
            sources = report.sources,
            failed_sources = report.failed_sources,
            shadowed = report.shadowed,
            duplicates = report.duplicates,
            malformed = report.malformed,
            disabled = report.disabled,
            "Module registry loaded"
        );
        Ok((registry, report))
    }
}
