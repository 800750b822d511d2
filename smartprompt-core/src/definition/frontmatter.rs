//! Loose prompt files with an optional `key: value` front-matter header.
//!
//! ```text
//! ---
//! type: Skill
//! priority: 500
//! intents: [Harvest]
//! keywords: harvest, reap, 收割
//! keywordweights: reap=0.5
//! ---
//! Body text...
//! ```
//!
//! A file without a header still becomes a module; its metadata is inferred
//! from the file name and markdown headings.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{DefinitionSource, ModuleDefinition, SourceKind};
use crate::error::{EngineError, Result};
use crate::types::Category;

/// Files whose trimmed content is shorter than this are ignored.
const MIN_CONTENT_CHARS: usize = 10;

/// Words never used as inferred keywords.
const COMMON_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "is", "are", "to", "for", "of", "in", "on", "with", "module",
    "txt",
];

/// A directory of `.txt` / `.md` prompt files.
#[derive(Debug, Clone)]
pub struct PromptDirectorySource {
    dir: PathBuf,
}

impl PromptDirectorySource {
    /// Scan `dir` (non-recursively).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DefinitionSource for PromptDirectorySource {
    fn label(&self) -> String {
        self.dir.display().to_string()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Loose
    }

    fn load(&self) -> Result<Vec<ModuleDefinition>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| EngineError::Source {
            source_name: self.label(),
            reason: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_prompt_file(path))
            .collect();
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read prompt file");
                    continue;
                }
            };
            match parse_prompt_file(stem, &content) {
                Some(def) => definitions.push(def),
                None => debug!(path = %path.display(), "Prompt file too short, skipped"),
            }
        }

        Ok(definitions)
    }
}

fn is_prompt_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"))
}

/// Turn one prompt file into a definition.
///
/// Returns `None` when the file has no header and too little content to be
/// worth a module.
#[must_use]
pub fn parse_prompt_file(name: &str, content: &str) -> Option<ModuleDefinition> {
    match extract_frontmatter(content) {
        Some((header, body)) => {
            let mut def = ModuleDefinition::named(name);
            apply_header(&mut def, header);
            def.body = Some(body.to_string());
            Some(def)
        }
        None => infer_definition(name, content),
    }
}

/// Split a leading `---` block from the body.
fn extract_frontmatter(content: &str) -> Option<(&str, &str)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let first_line_end = content.find('\n')?;
    if content[..first_line_end].trim() != "---" {
        return None;
    }
    let after_open = &content[first_line_end + 1..];

    let mut offset = 0;
    for line in after_open.split_inclusive('\n') {
        if line.trim() == "---" {
            let header = &after_open[..offset];
            let body = &after_open[offset + line.len()..];
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

fn apply_header(def: &mut ModuleDefinition, header: &str) {
    for line in header.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = unquote(value.trim());

        match key.as_str() {
            "defname" | "name" => def.name = value.to_string(),
            "label" => def.label = Some(value.to_string()),
            "description" => def.description = value.to_string(),
            "type" | "moduletype" | "category" => match value.parse::<Category>() {
                Ok(category) => def.category = category,
                Err(e) => warn!(module = %def.name, error = %e, "Ignoring front-matter category"),
            },
            "priority" => match value.parse::<i32>() {
                Ok(p) => def.priority = p,
                Err(_) => warn!(module = %def.name, value, "Ignoring non-integer priority"),
            },
            "alwaysactive" => set_bool(&mut def.always_active, value, &def.name),
            "requirescombat" | "requirescombatstate" => {
                set_bool(&mut def.requires_combat_state, value, &def.name);
            }
            "requirespeace" | "requirespeacestate" => {
                set_bool(&mut def.requires_peace_state, value, &def.name);
            }
            "templated" => set_bool(&mut def.templated, value, &def.name),
            "intents" | "triggerintents" => def.trigger_intents = parse_list(value),
            "keywords" | "expandedkeywords" => def.expanded_keywords = parse_list(value),
            "keywordweights" => {
                for item in parse_list(value) {
                    let parsed = item
                        .split_once('=')
                        .and_then(|(k, w)| Some((k.trim(), w.trim().parse::<f32>().ok()?)));
                    match parsed {
                        Some((k, w)) if !k.is_empty() => {
                            def.keyword_weights.insert(k.to_string(), w);
                        }
                        _ => warn!(module = %def.name, entry = %item, "Ignoring malformed keyword weight"),
                    }
                }
            }
            "dependencies" | "depends" => def.dependencies = parse_list(value),
            "exclusivewith" | "exclusive" => def.exclusive_with = parse_list(value),
            _ => {}
        }
    }
}

fn set_bool(target: &mut bool, value: &str, module: &str) {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" => *target = true,
        "false" | "no" => *target = false,
        _ => warn!(module, value, "Ignoring non-boolean front-matter value"),
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s)
}

/// `[a, b]` or `a, b`.
fn parse_list(value: &str) -> Vec<String> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value);
    inner
        .split(',')
        .map(|item| unquote(item.trim()).trim())
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Inference for header-less files
// ---------------------------------------------------------------------------

fn infer_definition(name: &str, content: &str) -> Option<ModuleDefinition> {
    if content.trim().chars().count() < MIN_CONTENT_CHARS {
        return None;
    }

    let mut def = ModuleDefinition::named(name);
    def.category = infer_category(name);
    def.priority = infer_priority(name);
    def.trigger_intents = infer_intents(name);
    def.expanded_keywords = extract_keywords(name, content);
    def.always_active = matches!(def.category, Category::Core | Category::FormatSpec);
    def.body = Some(content.to_string());
    Some(def)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn infer_category(name: &str) -> Category {
    let lower = name.to_lowercase();
    if contains_any(&lower, &["identity", "core", "system"]) {
        Category::Core
    } else if contains_any(&lower, &["format", "output", "structure"]) {
        Category::FormatSpec
    } else if contains_any(&lower, &["module_", "skill"]) {
        Category::Skill
    } else if contains_any(&lower, &["context", "behavior", "rules"]) {
        Category::SituationalContext
    } else if contains_any(&lower, &["memory", "history"]) {
        Category::Memory
    } else {
        Category::Extension
    }
}

fn infer_priority(name: &str) -> i32 {
    let lower = name.to_lowercase();
    if contains_any(&lower, &["identity", "core"]) {
        1000
    } else if contains_any(&lower, &["system", "master"]) {
        900
    } else if contains_any(&lower, &["format", "output"]) {
        800
    } else if contains_any(&lower, &["behavior", "rules"]) {
        700
    } else if contains_any(&lower, &["romantic", "affinity"]) {
        600
    } else if lower.contains("module_") {
        500
    } else {
        100
    }
}

fn infer_intents(name: &str) -> Vec<String> {
    const RULES: &[(&[&str], &str)] = &[
        (&["agriculture", "harvest", "farm"], "Harvest"),
        (&["combat", "attack", "fight"], "Combat"),
        (&["construction", "build"], "Build"),
        (&["hunt"], "Hunt"),
        (&["medical", "doctor"], "Medical"),
        (&["craft", "make"], "Craft"),
        (&["research"], "Research"),
    ];

    let lower = name.to_lowercase();
    RULES
        .iter()
        .filter(|(needles, _)| contains_any(&lower, needles))
        .map(|(_, intent)| (*intent).to_string())
        .collect()
}

fn is_common_word(word: &str) -> bool {
    COMMON_WORDS.iter().any(|w| w.eq_ignore_ascii_case(word))
}

fn extract_keywords(name: &str, content: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    let mut push = |word: &str| {
        let word = word.to_lowercase();
        if !keywords.contains(&word) {
            keywords.push(word);
        }
    };

    for part in name.split(['_', '-', ' ']) {
        if part.chars().count() > 2 && !is_common_word(part) {
            push(part);
        }
    }

    for line in content.lines() {
        let line = line.trim_start();
        if !line.starts_with('#') {
            continue;
        }
        let header = line.trim_start_matches(['#', ' ', '\t']).trim_end();
        for word in header.split([' ', ':', '-', '（', '）', '(', ')']) {
            if word.chars().count() > 1 && !is_common_word(word) {
                push(word);
            }
        }
    }

    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_and_aliases() {
        let content = "---\n\
            Type: Skill\n\
            priority: 500\n\
            intents: [Harvest, Farming]\n\
            keywords: harvest, reap, 收割\n\
            keywordweights: reap=0.5, bogus\n\
            RequiresPeace: true\n\
            dependencies: [FormatRules]\n\
            ---\n\
            Sow in spring, reap in autumn.\n";
        let def = parse_prompt_file("Module_Agriculture", content).expect("has header");
        assert_eq!(def.name, "Module_Agriculture");
        assert_eq!(def.category, Category::Skill);
        assert_eq!(def.priority, 500);
        assert_eq!(def.trigger_intents, vec!["Harvest", "Farming"]);
        assert_eq!(def.expanded_keywords, vec!["harvest", "reap", "收割"]);
        assert_eq!(def.keyword_weights.get("reap"), Some(&0.5));
        assert_eq!(def.keyword_weights.len(), 1);
        assert!(def.requires_peace_state);
        assert_eq!(def.dependencies, vec!["FormatRules"]);
        assert_eq!(def.body.as_deref(), Some("Sow in spring, reap in autumn.\n"));
    }

    #[test]
    fn header_may_rename_module() {
        let content = "---\ndefName: Farming\n---\nbody text here";
        let def = parse_prompt_file("file_stem", content).expect("has header");
        assert_eq!(def.name, "Farming");
    }

    #[test]
    fn unclosed_header_is_plain_content() {
        let content = "---\ntype: Skill\nno closing line follows";
        let def = parse_prompt_file("Notes", content).expect("long enough");
        assert_eq!(def.category, Category::Extension);
        assert_eq!(def.body.as_deref(), Some(content));
    }

    #[test]
    fn plain_identity_file_is_always_active_core() {
        let def = parse_prompt_file("SystemIdentity", "You are the colony's storyteller.")
            .expect("long enough");
        assert_eq!(def.category, Category::Core);
        assert_eq!(def.priority, 1000);
        assert!(def.always_active);
    }

    #[test]
    fn plain_skill_file_infers_intents_and_keywords() {
        let content = "## Harvest Basics\nCut when ripe.\n### Storage: Freezers\nKeep cold.";
        let def = parse_prompt_file("Module_Farm_Harvest", content).expect("long enough");
        assert_eq!(def.category, Category::Skill);
        assert_eq!(def.priority, 500);
        assert!(!def.always_active);
        assert_eq!(def.trigger_intents, vec!["Harvest"]);
        assert_eq!(
            def.expanded_keywords,
            vec!["farm", "harvest", "basics", "storage", "freezers"]
        );
    }

    #[test]
    fn short_plain_file_is_skipped() {
        assert!(parse_prompt_file("Tiny", "  hi  ").is_none());
    }

    #[test]
    fn directory_source_reads_sorted_prompt_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("b_rules.md"), "Always be polite to guests.").expect("write");
        std::fs::write(dir.path().join("a_identity.txt"), "You are the narrator of this colony.")
            .expect("write");
        std::fs::write(dir.path().join("ignored.toml"), "name = 'x'").expect("write");
        std::fs::write(dir.path().join("tiny.txt"), "x").expect("write");

        let source = PromptDirectorySource::new(dir.path());
        assert_eq!(source.kind(), SourceKind::Loose);
        let defs = source.load().expect("readable dir");
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a_identity", "b_rules"]);
    }

    #[test]
    fn missing_directory_is_source_error() {
        let source = PromptDirectorySource::new("/nonexistent/prompts");
        assert!(matches!(source.load(), Err(EngineError::Source { .. })));
    }
}
