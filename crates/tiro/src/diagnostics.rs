//! Compile-time diagnostics.
//!
//! The compiler never fails with an error value; it records structured
//! diagnostics into a [`Diagnostics`] sink and returns no module when any
//! error-level entry is present. Formatting to text is done on demand so the
//! records stay cheap to produce.

use std::fmt::Write;

use strum::{Display, IntoStaticStr};

use crate::span::{Span, line_column};

/// Severity of a single diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A single structured diagnostic: where, how bad, and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub span: Span,
    pub severity: Severity,
    pub message: String,
}

/// Ordered collection of diagnostics produced by one compilation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    errors: usize,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, severity: Severity, span: Span, message: impl Into<String>) {
        if severity == Severity::Error {
            self.errors += 1;
        }
        self.entries.push(Diagnostic {
            span,
            severity,
            message: message.into(),
        });
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Error, span, message);
    }

    pub fn warning(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Warning, span, message);
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    #[must_use]
    pub fn has_messages(&self) -> bool {
        !self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.errors = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> + '_ {
        self.entries.iter()
    }

    /// Renders all entries as `file:line:column: severity: message` lines.
    #[must_use]
    pub fn render(&self, file_name: &str, source: &str) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let (line, column) = line_column(source, entry.span.start);
            let _ = writeln!(
                out,
                "{file_name}:{line}:{column}: {}: {}",
                entry.severity, entry.message
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_count_tracks_severity() {
        let mut diag = Diagnostics::new();
        diag.warning(Span::new(0, 1), "meh");
        assert!(!diag.has_errors());
        diag.error(Span::new(2, 3), "bad");
        assert!(diag.has_errors());
        assert_eq!(diag.len(), 2);
    }

    #[test]
    fn render_uses_line_and_column() {
        let mut diag = Diagnostics::new();
        diag.error(Span::new(3, 4), "unexpected token");
        let text = diag.render("test.tiro", "ab\ncd");
        assert_eq!(text, "test.tiro:2:1: error: unexpected token\n");
    }
}
