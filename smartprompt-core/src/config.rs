//! Configuration for the SmartPrompt engine.
//!
//! Maps directly to `smartprompt.toml`. Every field has a default, so an
//! empty file is a valid configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Top-level engine configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Routing thresholds and limits.
    #[serde(default)]
    pub router: RouterConfig,
    /// Document assembly settings.
    #[serde(default)]
    pub assembler: AssemblerConfig,
    /// Keyword automaton limits.
    #[serde(default)]
    pub index: IndexConfig,
    /// Where module definitions come from.
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Toolbox heuristic keyword lists.
    #[serde(default)]
    pub toolbox: ToolboxConfig,
    /// Telemetry & observability.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `EngineError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Matches scoring below this are ignored.
    #[serde(default = "default_min_score")]
    pub min_score_threshold: f32,
    /// Maximum modules in a routed decision.
    #[serde(default = "default_max_modules")]
    pub max_modules: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_score_threshold: default_min_score(),
            max_modules: default_max_modules(),
        }
    }
}

/// Document assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Emit a `## Title` header before each category group.
    #[serde(default = "default_true")]
    pub include_group_headers: bool,
    /// Maximum document length in chars (0 = unlimited).
    #[serde(default)]
    pub max_document_length: usize,
    /// Divisor for the token estimate.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    /// Precede each body with an HTML comment naming the module.
    #[serde(default)]
    pub debug_annotations: bool,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            include_group_headers: true,
            max_document_length: 0,
            chars_per_token: default_chars_per_token(),
            debug_annotations: false,
        }
    }
}

/// Keyword automaton limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Building a trie with more nodes than this fails.
    #[serde(default = "default_max_nodes")]
    pub max_automaton_nodes: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_automaton_nodes: default_max_nodes(),
        }
    }
}

/// Definition source locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Structured definitions file (`[[module]]` tables, or JSON by extension).
    #[serde(default)]
    pub modules_file: Option<PathBuf>,
    /// Directory of loose `.txt` / `.md` definitions with optional front matter.
    #[serde(default)]
    pub prompt_dir: Option<PathBuf>,
    /// Directory used to resolve `body_ref` entries.
    #[serde(default)]
    pub body_dir: Option<PathBuf>,
    /// Module names that are never registered.
    #[serde(default)]
    pub disabled_modules: Vec<String>,
}

/// Keyword lists for the toolbox heuristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolboxConfig {
    /// Any of these in the input means the caller wants tools.
    #[serde(default = "default_tool_keywords")]
    pub tool_keywords: Vec<String>,
    /// Small-talk markers.
    #[serde(default = "default_chat_keywords")]
    pub chat_keywords: Vec<String>,
    /// Inputs shorter than this with no module hits count as chat.
    #[serde(default = "default_short_input")]
    pub short_input_chars: usize,
}

impl Default for ToolboxConfig {
    fn default() -> Self {
        Self {
            tool_keywords: default_tool_keywords(),
            chat_keywords: default_chat_keywords(),
            short_input_chars: default_short_input(),
        }
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log a warning when an operation exceeds this many milliseconds.
    #[serde(default = "default_slow_ms")]
    pub log_slow_operations_ms: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_slow_operations_ms: default_slow_ms(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_min_score() -> f32 { 0.5 }
fn default_max_modules() -> usize { 10 }
fn default_chars_per_token() -> usize { 3 }
fn default_max_nodes() -> usize { 4_000_000 }
fn default_short_input() -> usize { 10 }
fn default_slow_ms() -> f64 { 5.0 }

fn default_tool_keywords() -> Vec<String> {
    [
        // actions
        "收割", "建造", "攻击", "撤退", "征召", "取消征召", "装备", "修复",
        "harvest", "build", "attack", "retreat", "draft", "undraft", "equip", "repair",
        // lookups
        "查一下", "找找", "位置", "在哪", "哪里", "查询", "搜索",
        "where", "find", "locate", "search", "scan",
        // events
        "触发", "事件", "袭击", "入侵", "派遣",
        "trigger", "event", "raid", "incident", "spawn",
        // avatar
        "降临", "化身", "回来", "升天", "实体",
        "descent", "ascend", "descend", "manifest", "physical",
        // outfits
        "换衣服", "换装", "穿", "脱", "服装",
        "outfit", "wear", "dress", "change clothes",
        // colony management
        "殖民者", "工作", "优先级", "策略", "政策",
        "colonist", "work", "priority", "policy",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn default_chat_keywords() -> Vec<String> {
    [
        // greetings
        "你好", "早", "晚安", "早安", "嗨", "喂", "在吗", "忙吗",
        "hi", "hello", "hey", "morning", "night", "good morning", "good night",
        // feelings
        "喜欢", "爱", "讨厌", "开心", "难过", "累", "烦", "高兴", "生气", "伤心",
        "love", "like", "hate", "happy", "sad", "tired", "bored", "angry",
        // small talk
        "聊聊", "说说", "讲讲", "谈谈", "怎么看", "你觉得", "你认为", "觉得怎么样",
        "chat", "talk", "think", "feel", "opinion", "what do you think",
        "你呢", "你怎么样", "怎么了", "发生什么", "怎样",
        "how are you", "are you there", "what happened", "how about you",
        // praise
        "好可爱", "真棒", "太厉害", "漂亮", "帅", "厉害", "聪明", "真好",
        "cute", "great", "awesome", "beautiful", "amazing", "smart", "nice",
        // daily life
        "吃饭", "睡觉", "休息", "无聊", "今天", "明天", "昨天", "天气",
        "eat", "sleep", "rest", "today", "tomorrow", "yesterday", "weather",
        "陪我", "跟我", "和我", "一起", "陪陪",
        "with me", "together", "stay with me",
        "谢谢", "感谢", "抱歉", "对不起", "不好意思",
        "thank", "thanks", "sorry", "apologize",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml("").expect("empty config parses");
        assert_eq!(config.general.log_level, "info");
        assert!((config.router.min_score_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.router.max_modules, 10);
        assert!(config.assembler.include_group_headers);
        assert_eq!(config.assembler.max_document_length, 0);
        assert_eq!(config.assembler.chars_per_token, 3);
        assert_eq!(config.index.max_automaton_nodes, 4_000_000);
        assert!(config.toolbox.tool_keywords.iter().any(|k| k == "harvest"));
        assert!(config.sources.modules_file.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [router]
            max_modules = 4

            [assembler]
            max_document_length = 2000
            debug_annotations = true

            [sources]
            prompt_dir = "prompts"
            disabled_modules = ["Legacy"]
            "#,
        )
        .expect("valid config");
        assert_eq!(config.router.max_modules, 4);
        assert!((config.router.min_score_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.assembler.max_document_length, 2000);
        assert!(config.assembler.debug_annotations);
        assert!(config.assembler.include_group_headers);
        assert_eq!(config.sources.prompt_dir, Some(PathBuf::from("prompts")));
        assert_eq!(config.sources.disabled_modules, vec!["Legacy".to_string()]);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let result = EngineConfig::from_toml("[router\nmax_modules = 'x'");
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = EngineConfig::from_file(std::path::Path::new("/nonexistent/smartprompt.toml"));
        assert!(matches!(result, Err(EngineError::Io(_))));
    }
}
