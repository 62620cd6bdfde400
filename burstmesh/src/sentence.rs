//! Sentence templates: the line-oriented text encoding used on the wire.
//!
//! Replicated index batches, container checkpoints and UDP commands are
//! exchanged as human-diffable sentences such as
//! `"Api key ABC is served by http://10.0.0.2:7777."`. A [`SentenceTemplate`]
//! is the print/scan pair for one sentence shape; `%s` marks a field.
//!
//! Scanning is literal-anchored: every field captures up to the first
//! occurrence of the literal that follows it, and the last field captures up
//! to the trailing literal at the end of the text. Fields therefore must not
//! contain the literal that follows them.

/// Placeholder marking a field inside a template.
pub const PLACEHOLDER: &str = "%s";

/// Errors from scanning a sentence against a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SentenceError {
    /// The text does not contain an expected literal part of the template.
    #[error("sentence does not match template near {literal:?}")]
    Mismatch {
        /// The literal that could not be matched.
        literal: String,
    },

    /// Two fields are adjacent, so the boundary between them is undefined.
    #[error("template has adjacent fields")]
    AmbiguousTemplate,
}

/// A print/scan pair for one sentence shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceTemplate {
    literals: Vec<String>,
}

impl SentenceTemplate {
    /// Compile a template; `%s` marks each field.
    pub fn new(pattern: &str) -> Self {
        Self {
            literals: pattern.split(PLACEHOLDER).map(str::to_string).collect(),
        }
    }

    /// Number of fields in the template.
    pub fn arity(&self) -> usize {
        self.literals.len() - 1
    }

    /// Render the template, filling fields in order.
    ///
    /// Missing values render as empty fields; extra values are ignored.
    pub fn print(&self, values: &[&str]) -> String {
        let mut out = String::new();
        for (i, literal) in self.literals.iter().enumerate() {
            out.push_str(literal);
            if i < self.arity() {
                out.push_str(values.get(i).copied().unwrap_or_default());
            }
        }
        out
    }

    /// Extract the fields of `text`, which must match the template entirely.
    pub fn scan(&self, text: &str) -> Result<Vec<String>, SentenceError> {
        let first = &self.literals[0];
        let mut rest = text.strip_prefix(first.as_str()).ok_or_else(|| SentenceError::Mismatch {
            literal: first.clone(),
        })?;

        let mut fields = Vec::with_capacity(self.arity());
        for (i, literal) in self.literals.iter().enumerate().skip(1) {
            let last = i == self.arity();
            if last {
                let field = rest.strip_suffix(literal.as_str()).ok_or_else(|| {
                    SentenceError::Mismatch {
                        literal: literal.clone(),
                    }
                })?;
                fields.push(field.to_string());
                rest = "";
            } else {
                if literal.is_empty() {
                    return Err(SentenceError::AmbiguousTemplate);
                }
                let end = rest.find(literal.as_str()).ok_or_else(|| SentenceError::Mismatch {
                    literal: literal.clone(),
                })?;
                fields.push(rest[..end].to_string());
                rest = &rest[end + literal.len()..];
            }
        }

        if rest.is_empty() {
            Ok(fields)
        } else {
            Err(SentenceError::Mismatch {
                literal: String::new(),
            })
        }
    }

    /// Whether `text` matches the template.
    pub fn matches(&self, text: &str) -> bool {
        self.scan(text).is_ok()
    }
}
