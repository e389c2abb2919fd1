//! Template expansion: (template, assignment) -> concrete program text.

use hs_types::{Assignment, SearchSpace, TemplateError};
use serde::{Deserialize, Serialize};

use crate::render::{quote_str, render_value, Dialect};
use crate::template::{Segment, Template};

/// How a marker is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExpansionMode {
    /// Replace the marker with the literal form of its assigned value.
    #[default]
    Inline,
    /// Replace the marker with `binding["name"]`, a lookup into a runtime
    /// configuration structure that the evaluator populates from the
    /// assignment.
    Lookup { binding: String },
}

/// Expands templates against assignments.
///
/// Expansion is a pure, single-pass function of its inputs. Rendered values
/// are never scanned for markers again, so a value that happens to contain
/// `{{name}}` is emitted verbatim inside its literal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expander {
    pub dialect: Dialect,
    pub mode: ExpansionMode,
}

impl Expander {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            mode: ExpansionMode::Inline,
        }
    }

    pub fn with_lookup(mut self, binding: impl Into<String>) -> Self {
        self.mode = ExpansionMode::Lookup {
            binding: binding.into(),
        };
        self
    }

    /// Expand `template` with `assignment`.
    ///
    /// Fails with [`TemplateError::UnresolvedParameter`] when a declared
    /// parameter or a referenced marker has no value, and with
    /// [`TemplateError::MalformedTemplate`] when a marker's context does not fit
    /// its parameter kind.
    pub fn expand(
        &self,
        template: &Template,
        space: &SearchSpace,
        assignment: &Assignment,
    ) -> Result<String, TemplateError> {
        space.check_assignment(assignment)?;
        for marker in template.markers() {
            if !assignment.contains(&marker.name) {
                return Err(TemplateError::UnresolvedParameter {
                    name: marker.name.clone(),
                });
            }
        }
        template.check(space)?;

        if let ExpansionMode::Lookup { binding } = &self.mode {
            if binding.trim().is_empty() {
                return Err(TemplateError::MalformedTemplate {
                    message: "lookup binding is empty".to_string(),
                });
            }
        }

        let mut out = String::with_capacity(template.literal_len() + 16 * assignment.len());
        for segment in template.segments() {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Marker(marker) => match &self.mode {
                    ExpansionMode::Inline => {
                        // presence checked above
                        if let Some(value) = assignment.get(&marker.name) {
                            out.push_str(&render_value(value, self.dialect)?);
                        }
                    }
                    ExpansionMode::Lookup { binding } => {
                        out.push_str(binding);
                        out.push('[');
                        out.push_str(&quote_str(&marker.name, self.dialect));
                        out.push(']');
                    }
                },
            }
        }
        Ok(out)
    }
}
