//! `{name}` placeholder substitution for templated module bodies.
//!
//! `{{` and `}}` produce literal braces. A placeholder naming an unknown
//! variable, or one that is never closed, fails the whole render so the
//! caller can fall back to the raw body.

use std::collections::BTreeMap;

use crate::error::{EngineError, Result};

/// Render `template` for `module` using `vars`.
///
/// # Errors
///
/// Returns [`EngineError::TemplateRenderFailure`] on an unknown variable,
/// an empty placeholder, or an unterminated placeholder.
pub fn render_template(module: &str, template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let fail = |reason: String| EngineError::TemplateRenderFailure {
        module: module.to_string(),
        reason,
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' if chars.peek().is_some_and(|&(_, c)| c == '{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let start = pos + 1;
                let mut end = None;
                for (i, c) in chars.by_ref() {
                    if c == '}' {
                        end = Some(i);
                        break;
                    }
                }
                let Some(end) = end else {
                    return Err(fail(format!("unterminated placeholder at byte {pos}")));
                };
                let name = template[start..end].trim();
                if name.is_empty() {
                    return Err(fail(format!("empty placeholder at byte {pos}")));
                }
                let value = vars
                    .get(name)
                    .ok_or_else(|| fail(format!("unknown variable '{name}'")))?;
                out.push_str(value);
            }
            '}' if chars.peek().is_some_and(|&(_, c)| c == '}') => {
                chars.next();
                out.push('}');
            }
            other => out.push(other),
        }
    }

    Ok(out)
}
