//! Keyword matching.
//!
//! [`PatternIndex`] compiles every module's intents and keywords into one
//! automaton and answers "which modules does this text talk about" with a
//! single scan of the input.

pub mod automaton;
pub mod toolbox;

use std::collections::{BTreeSet, HashMap};
use std::ops::ControlFlow;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::module::ContentModule;
use crate::registry::ModuleRegistry;

use automaton::{Automaton, AutomatonBuilder, PatternId};

pub use toolbox::ToolboxDetector;

/// Accumulated hits for one `(module, intent)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Module the hits belong to.
    pub module: String,
    /// Intent label (empty when the module declares none).
    pub intent: String,
    /// Sum of weights over every occurrence.
    pub score: f32,
    /// Distinct matched patterns, in first-hit order.
    pub hit_keywords: Vec<String>,
}

/// Size figures for a built index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Modules indexed.
    pub modules: usize,
    /// Distinct lowercase patterns in the trie.
    pub patterns: usize,
    /// `(pattern, module, intent)` tags.
    pub tags: usize,
    /// Trie nodes, root included.
    pub nodes: usize,
}

#[derive(Debug, Clone, Copy)]
struct Tag {
    module: u32,
    intent: u32,
    weight: f32,
}

/// Multi-pattern index over a registry.
#[derive(Debug, Default)]
pub struct PatternIndex {
    automaton: Automaton,
    /// Tags per pattern id.
    tags: Vec<Vec<Tag>>,
    module_names: Vec<String>,
    intents: Vec<String>,
}

/// Interns strings to dense ids.
#[derive(Default)]
struct Interner {
    ids: HashMap<String, u32>,
    values: Vec<String>,
}

impl Interner {
    fn intern(&mut self, value: &str) -> u32 {
        if let Some(&id) = self.ids.get(value) {
            return id;
        }
        // Bounded by the number of patterns, which the node budget caps well below u32::MAX.
        let id = u32::try_from(self.values.len()).unwrap_or(u32::MAX);
        self.ids.insert(value.to_string(), id);
        self.values.push(value.to_string());
        id
    }
}

impl PatternIndex {
    /// An index that matches nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an index over every module in `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::BuildFailure`] if the trie would exceed
    /// `max_nodes`. Nothing partially built escapes.
    pub fn build(registry: &ModuleRegistry, max_nodes: usize) -> Result<Self> {
        Self::build_from_modules(registry.all_modules().map(AsRef::as_ref), max_nodes)
    }

    /// Build an index over an arbitrary module list.
    ///
    /// Each intent is inserted (lowercased) with weight 1.0. Each keyword
    /// is inserted (lowercased) once per intent the module declares, or
    /// once with an empty intent when it declares none.
    ///
    /// # Errors
    ///
    /// See [`PatternIndex::build`].
    pub fn build_from_modules<'a>(
        modules: impl IntoIterator<Item = &'a ContentModule>,
        max_nodes: usize,
    ) -> Result<Self> {
        let mut builder = AutomatonBuilder::new(max_nodes);
        let mut tags: Vec<Vec<Tag>> = Vec::new();
        let mut module_names = Interner::default();
        let mut intents = Interner::default();

        let mut add = |builder: &mut AutomatonBuilder, text: &str, tag: Tag| -> Result<()> {
            let normalized = text.trim().to_lowercase();
            if normalized.is_empty() {
                return Ok(());
            }
            let id = builder.insert(&normalized)? as usize;
            if tags.len() <= id {
                tags.resize_with(id + 1, Vec::new);
            }
            tags[id].push(tag);
            Ok(())
        };

        for module in modules {
            let module_id = module_names.intern(module.name());

            for intent in module.trigger_intents() {
                let intent_id = intents.intern(intent);
                add(
                    &mut builder,
                    intent,
                    Tag {
                        module: module_id,
                        intent: intent_id,
                        weight: 1.0,
                    },
                )?;
            }

            let keyword_intents: Vec<u32> = if module.trigger_intents().is_empty() {
                vec![intents.intern("")]
            } else {
                module
                    .trigger_intents()
                    .iter()
                    .map(|i| intents.intern(i))
                    .collect()
            };

            for keyword in module.keywords() {
                for &intent_id in &keyword_intents {
                    add(
                        &mut builder,
                        &keyword.text,
                        Tag {
                            module: module_id,
                            intent: intent_id,
                            weight: keyword.weight,
                        },
                    )?;
                }
            }
        }

        let automaton = builder.build();
        let index = Self {
            automaton,
            tags,
            module_names: module_names.values,
            intents: intents.values,
        };
        let stats = index.stats();
        debug!(
            modules = stats.modules,
            patterns = stats.patterns,
            nodes = stats.nodes,
            "Pattern index built"
        );
        Ok(index)
    }

    /// Whether the index holds no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.automaton.pattern_count() == 0
    }

    /// Size figures.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            modules: self.module_names.len(),
            patterns: self.automaton.pattern_count(),
            tags: self.tags.iter().map(Vec::len).sum(),
            nodes: self.automaton.node_count(),
        }
    }

    /// Find every registered pattern in `text`.
    ///
    /// Matching is case-insensitive. Results are ordered by score
    /// descending, then module name, then intent.
    #[must_use]
    pub fn search(&self, text: &str) -> Vec<PatternMatch> {
        if text.is_empty() || self.is_empty() {
            return Vec::new();
        }

        let lowered = text.to_lowercase();
        let mut acc: HashMap<(u32, u32), (f32, Vec<PatternId>)> = HashMap::new();

        self.automaton.scan(&lowered, |pattern| {
            if let Some(tags) = self.tags.get(pattern as usize) {
                for tag in tags {
                    let entry = acc.entry((tag.module, tag.intent)).or_default();
                    entry.0 += tag.weight;
                    if !entry.1.contains(&pattern) {
                        entry.1.push(pattern);
                    }
                }
            }
            ControlFlow::Continue(())
        });

        let mut matches: Vec<PatternMatch> = acc
            .into_iter()
            .map(|((module, intent), (score, hits))| PatternMatch {
                module: self.module_names[module as usize].clone(),
                intent: self.intents[intent as usize].clone(),
                score,
                hit_keywords: hits
                    .into_iter()
                    .filter_map(|id| self.automaton.pattern(id).map(ToString::to_string))
                    .collect(),
            })
            .collect();

        matches.sort_by(|a, b| {
            OrderedFloat(b.score)
                .cmp(&OrderedFloat(a.score))
                .then_with(|| a.module.cmp(&b.module))
                .then_with(|| a.intent.cmp(&b.intent))
        });
        matches
    }

    /// Whether `intent` (case-insensitive) is matched anywhere in `text`.
    #[must_use]
    pub fn has_intent(&self, text: &str, intent: &str) -> bool {
        let wanted = intent.to_lowercase();
        self.search(text)
            .iter()
            .any(|m| m.intent.to_lowercase() == wanted)
    }

    /// Names of modules with a match scoring at least `min_score`.
    #[must_use]
    pub fn matched_modules(&self, text: &str, min_score: f32) -> BTreeSet<String> {
        self.search(text)
            .into_iter()
            .filter(|m| m.score >= min_score)
            .map(|m| m.module)
            .collect()
    }

    /// Distinct non-empty intents scoring at least `min_score`, best first.
    #[must_use]
    pub fn matched_intents(&self, text: &str, min_score: f32) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for m in self.search(text) {
            if m.score >= min_score && !m.intent.is_empty() && !out.contains(&m.intent) {
                out.push(m.intent);
            }
        }
        out
    }
}
