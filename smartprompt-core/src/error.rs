//! Error types for the SmartPrompt core library.

use thiserror::Error;

/// Top-level error type for all SmartPrompt operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A module with the same name is already registered.
    #[error("Duplicate module name: {0}")]
    DuplicateModuleName(String),

    /// A module definition is structurally invalid (bad weight, empty name, ...).
    #[error("Malformed definition for '{name}': {reason}")]
    MalformedDefinition {
        /// Name of the offending module (may be empty if the name itself is missing).
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The keyword automaton could not be constructed.
    #[error("Pattern index build failed: {0}")]
    BuildFailure(String),

    /// A module template could not be rendered.
    #[error("Template render failed for '{module}': {reason}")]
    TemplateRenderFailure {
        /// Module whose body failed to render.
        module: String,
        /// Parser or lookup failure description.
        reason: String,
    },

    /// Module resolution hit an inconsistent state.
    #[error("Route failed: {0}")]
    RouteFailure(String),

    /// A reload produced zero usable modules.
    #[error("No modules loaded from {sources} definition source(s)")]
    NoModulesLoaded {
        /// Number of sources consulted.
        sources: usize,
    },

    /// A definition source could not be read or parsed.
    #[error("Definition source '{source_name}' failed: {reason}")]
    Source {
        /// Human-readable source label (file path, directory, ...).
        source_name: String,
        /// Underlying failure.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Shorthand for a [`EngineError::MalformedDefinition`].
    pub(crate) fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, EngineError>;
