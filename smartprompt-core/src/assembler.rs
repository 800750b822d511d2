//! Document assembly from a routed module list.
//!
//! Modules are grouped by category in canonical order, keeping routing
//! order within a group. Templated bodies that fail to render fall back to
//! their raw text; assembly itself never fails.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::AssemblerConfig;
use crate::module::ContentModule;
use crate::router::RouteDecision;
use crate::template::render_template;
use crate::types::{Category, EnvironmentSnapshot};

const BLOCK_SEPARATOR: &str = "\n\n";

/// The final bounded document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledDocument {
    /// Document text.
    pub text: String,
    /// Modules that contributed a non-empty body.
    pub module_count: usize,
    /// Names of contributing modules, in document order.
    pub modules: Vec<String>,
    /// Rough token estimate (`chars / chars_per_token`).
    pub estimated_tokens: usize,
    /// Whether the text was cut at the length limit.
    pub truncated: bool,
    /// Modules whose template failed and were emitted raw.
    pub render_failures: Vec<String>,
    /// Routing error carried over when this is a fallback document.
    pub error: Option<String>,
}

/// Builds documents under one assembler configuration.
#[derive(Debug, Clone, Default)]
pub struct ContentAssembler {
    config: AssemblerConfig,
}

impl ContentAssembler {
    /// Create an assembler.
    #[must_use]
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Assemble the modules of a routed decision, using its environment.
    #[must_use]
    pub fn assemble_decision(
        &self,
        decision: &RouteDecision,
        context: &BTreeMap<String, String>,
    ) -> AssembledDocument {
        self.assemble(&decision.modules, &decision.environment, context)
    }

    /// Assemble `modules` (already ranked) into one document.
    ///
    /// Template variables are `context` layered over the environment's
    /// own variables.
    #[must_use]
    pub fn assemble(
        &self,
        modules: &[Arc<ContentModule>],
        env: &EnvironmentSnapshot,
        context: &BTreeMap<String, String>,
    ) -> AssembledDocument {
        let mut vars = env.template_vars();
        vars.extend(context.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut doc = AssembledDocument::default();
        let mut blocks: Vec<String> = Vec::new();

        for category in Category::ALL {
            let mut group: Vec<String> = Vec::new();
            for module in modules.iter().filter(|m| m.category() == category) {
                let body = self.render_body(module, &vars, &mut doc.render_failures);
                let body = body.trim();
                if body.is_empty() {
                    continue;
                }
                let block = if self.config.debug_annotations {
                    format!(
                        "<!-- Module: {} (Priority: {}) -->\n{body}",
                        module.name(),
                        module.priority()
                    )
                } else {
                    body.to_string()
                };
                group.push(block);
                doc.modules.push(module.name().to_string());
            }

            if group.is_empty() {
                continue;
            }
            if self.config.include_group_headers {
                blocks.push(format!("## {}", category.header_title()));
            }
            blocks.extend(group);
        }

        doc.text = blocks.join(BLOCK_SEPARATOR);
        doc.module_count = doc.modules.len();

        let max = self.config.max_document_length;
        let cut = if max > 0 {
            doc.text.char_indices().nth(max).map(|(byte, _)| byte)
        } else {
            None
        };
        if let Some(cut) = cut {
            info!(
                limit = max,
                original_chars = doc.text.chars().count(),
                "Document truncated"
            );
            doc.text.truncate(cut);
            doc.truncated = true;
        }

        doc.estimated_tokens = doc.text.chars().count() / self.config.chars_per_token.max(1);
        doc
    }

    fn render_body(
        &self,
        module: &ContentModule,
        vars: &BTreeMap<String, String>,
        failures: &mut Vec<String>,
    ) -> String {
        let raw = module.body();
        if !module.templated() {
            return raw.to_string();
        }
        match render_template(module.name(), raw, vars) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(module = %module.name(), error = %e, "Template render failed, using raw body");
                failures.push(module.name().to_string());
                raw.to_string()
            }
        }
    }
}
