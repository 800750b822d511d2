//! Heuristic for whether an input calls for the caller's tool list.
//!
//! Tool keywords win outright. Otherwise a matched `Skill` module means
//! tools are needed, while small talk and short inputs with no module hits
//! do not. Anything left over defaults to needing tools.

use tracing::warn;

use super::PatternIndex;
use super::automaton::{Automaton, AutomatonBuilder};
use crate::config::ToolboxConfig;
use crate::registry::ModuleRegistry;
use crate::types::Category;

/// Module hits below this score are ignored by the heuristic.
const MODULE_SCORE_FLOOR: f32 = 0.5;

/// Compiled keyword lists for [`ToolboxDetector::needs_toolbox`].
#[derive(Debug, Default)]
pub struct ToolboxDetector {
    tools: Automaton,
    chat: Automaton,
    short_input_chars: usize,
}

fn compile(keywords: &[String], list: &str) -> Automaton {
    let mut builder = AutomatonBuilder::new(usize::MAX);
    for keyword in keywords {
        let normalized = keyword.trim().to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        if let Err(e) = builder.insert(&normalized) {
            warn!(list, keyword = %keyword, error = %e, "Skipping toolbox keyword");
        }
    }
    builder.build()
}

impl ToolboxDetector {
    /// Compile the configured keyword lists.
    #[must_use]
    pub fn new(config: &ToolboxConfig) -> Self {
        Self {
            tools: compile(&config.tool_keywords, "tool"),
            chat: compile(&config.chat_keywords, "chat"),
            short_input_chars: config.short_input_chars,
        }
    }

    /// Decide whether `text` needs the tool list.
    #[must_use]
    pub fn needs_toolbox(&self, text: &str, index: &PatternIndex, registry: &ModuleRegistry) -> bool {
        if text.trim().is_empty() {
            return false;
        }

        let lowered = text.to_lowercase();
        if self.tools.is_match(&lowered) {
            return true;
        }

        let matched = index.matched_modules(text, MODULE_SCORE_FLOOR);
        let skill_hit = matched
            .iter()
            .filter_map(|name| registry.get(name))
            .any(|m| m.category() == Category::Skill);
        if skill_hit {
            return true;
        }

        if matched.is_empty() {
            if self.chat.is_match(&lowered) {
                return false;
            }
            if text.chars().count() < self.short_input_chars {
                return false;
            }
        }

        true
    }
}
