//! Core type definitions shared across the pipeline.
//!
//! All types are serializable so route decisions and documents can be
//! exported for diagnostics.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Content module category.
///
/// Variants are declared in canonical assembly order, so the derived `Ord`
/// is the order groups appear in an assembled document.
///
/// Deserialisation goes through [`FromStr`], so definition files may use any
/// case and the short aliases.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String")]
pub enum Category {
    /// Identity / persona core, usually always active.
    Core,
    /// Output format rules, usually pulled in as a dependency.
    FormatSpec,
    /// Situational context (emergencies, social scenes, ...).
    SituationalContext,
    /// Skill packs (farming, combat, construction, ...).
    #[default]
    Skill,
    /// Historical events and relationships.
    Memory,
    /// Modules contributed by third-party extensions.
    Extension,
}

impl Category {
    /// All categories in canonical order.
    pub const ALL: [Category; 6] = [
        Self::Core,
        Self::FormatSpec,
        Self::SituationalContext,
        Self::Skill,
        Self::Memory,
        Self::Extension,
    ];

    /// Position in the canonical order (Core = 0).
    #[must_use]
    pub fn canonical_rank(self) -> u8 {
        self as u8
    }

    /// Section title used when group headers are enabled.
    #[must_use]
    pub fn header_title(self) -> &'static str {
        match self {
            Self::Core => "Core Identity",
            Self::FormatSpec => "Output Format",
            Self::SituationalContext => "Current Context",
            Self::Skill => "Skills & Knowledge",
            Self::Memory => "Memories",
            Self::Extension => "Extensions",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Core => "Core",
            Self::FormatSpec => "FormatSpec",
            Self::SituationalContext => "SituationalContext",
            Self::Skill => "Skill",
            Self::Memory => "Memory",
            Self::Extension => "Extension",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Category {
    type Err = String;

    /// Case-insensitive, accepting the short aliases used by loose prompt files.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "core" => Ok(Self::Core),
            "format" | "formatspec" => Ok(Self::FormatSpec),
            "context" | "situationalcontext" => Ok(Self::SituationalContext),
            "skill" => Ok(Self::Skill),
            "memory" => Ok(Self::Memory),
            "extension" => Ok(Self::Extension),
            other => Err(format!("unknown category: '{other}'")),
        }
    }
}

impl TryFrom<String> for Category {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Read-only view of the host application's state at routing time.
///
/// Only `is_in_combat` participates in gating. Everything else is passed
/// through to template rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Whether the host is currently in a combat situation.
    #[serde(default)]
    pub is_in_combat: bool,
    /// Number of colonists / party members, if known.
    #[serde(default)]
    pub colonist_count: Option<u32>,
    /// Total wealth, if known.
    #[serde(default)]
    pub wealth: Option<f64>,
    /// Current season label, if known.
    #[serde(default)]
    pub season: Option<String>,
    /// Free-form tags supplied by the host.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Additional opaque key/value pairs for templates.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl EnvironmentSnapshot {
    /// A peaceful environment with no other data.
    #[must_use]
    pub fn peaceful() -> Self {
        Self::default()
    }

    /// An in-combat environment with no other data.
    #[must_use]
    pub fn in_combat() -> Self {
        Self {
            is_in_combat: true,
            ..Self::default()
        }
    }

    /// Add a pass-through template value.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Add a host tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Flatten the snapshot into template variables.
    ///
    /// Absent optional fields are omitted so templates referencing them fail
    /// loudly instead of rendering an empty string.
    #[must_use]
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        let mut vars = self.extra.clone();
        vars.insert("is_in_combat".to_string(), self.is_in_combat.to_string());
        if let Some(count) = self.colonist_count {
            vars.insert("colonist_count".to_string(), count.to_string());
        }
        if let Some(wealth) = self.wealth {
            vars.insert("wealth".to_string(), format!("{wealth:.0}"));
        }
        if let Some(ref season) = self.season {
            vars.insert("season".to_string(), season.clone());
        }
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            vars.insert("tags".to_string(), tags.join(", "));
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_order_is_canonical() {
        let mut shuffled = vec![
            Category::Extension,
            Category::Skill,
            Category::Core,
            Category::Memory,
            Category::SituationalContext,
            Category::FormatSpec,
        ];
        shuffled.sort();
        assert_eq!(shuffled, Category::ALL.to_vec());
    }

    #[test]
    fn category_parses_aliases() {
        assert_eq!("Format".parse::<Category>(), Ok(Category::FormatSpec));
        assert_eq!("context".parse::<Category>(), Ok(Category::SituationalContext));
        assert_eq!(" SKILL ".parse::<Category>(), Ok(Category::Skill));
        assert!("weather".parse::<Category>().is_err());
    }

    #[test]
    fn category_deserializes_leniently() {
        #[derive(Deserialize)]
        struct Holder {
            category: Category,
        }
        let lower: Holder = toml::from_str("category = \"skill\"").expect("lowercase");
        assert_eq!(lower.category, Category::Skill);
        let alias: Holder = serde_json::from_str(r#"{"category": "Format"}"#).expect("alias");
        assert_eq!(alias.category, Category::FormatSpec);
        assert!(serde_json::from_str::<Holder>(r#"{"category": "weather"}"#).is_err());
        assert_eq!(
            serde_json::to_string(&Category::SituationalContext).expect("serializes"),
            "\"SituationalContext\""
        );
    }

    #[test]
    fn template_vars_omit_missing_fields() {
        let env = EnvironmentSnapshot::in_combat()
            .with_tag("raid")
            .with_extra("player", "Ana");
        let vars = env.template_vars();
        assert_eq!(vars.get("is_in_combat").map(String::as_str), Some("true"));
        assert_eq!(vars.get("tags").map(String::as_str), Some("raid"));
        assert_eq!(vars.get("player").map(String::as_str), Some("Ana"));
        assert!(!vars.contains_key("season"));
    }
}
