//! Rendering of compile errors against the source text: a header line, the
//! offending source line, and a caret underline. Presentation only; the
//! structured [`CompileError`](crate::compiler::error::CompileError) values
//! remain the API.

use crate::compiler::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: String,
    pub line: usize,
    pub col: usize,
    pub source_line: Option<String>,
    pub underline: Option<String>,
}

impl Diagnostic {
    pub fn from_error(error: &CompileError, source: &str, filename: &str) -> Self {
        let line_text = source
            .lines()
            .nth(error.span.line.saturating_sub(1))
            .map(|l| l.to_string());
        let underline = line_text.as_ref().map(|text| {
            let col = error.span.col.saturating_sub(1).min(text.len());
            let width = (error.span.end.saturating_sub(error.span.start)).max(1);
            format!("{}{}", " ".repeat(col), "^".repeat(width.min(text.len() + 1 - col)))
        });
        Diagnostic {
            severity: Severity::Error,
            message: error.kind.to_string(),
            file: filename.to_string(),
            line: error.span.line,
            col: error.span.col,
            source_line: line_text,
            underline,
        }
    }

    /// Render with ANSI colors for terminal display.
    pub fn render_ansi(&self) -> String {
        let mut out = String::new();
        let label = match self.severity {
            Severity::Error => red("error"),
            Severity::Warning => yellow("warning"),
        };
        out.push_str(&format!(
            "{}: {}\n  {} {}:{}:{}\n",
            label,
            bold(&self.message),
            cyan("-->"),
            self.file,
            self.line,
            self.col
        ));
        if let (Some(line), Some(underline)) = (&self.source_line, &self.underline) {
            let line_no = format!("{}", self.line);
            out.push_str(&format!("  {} | {}\n", gray(&line_no), line));
            out.push_str(&format!(
                "  {} | {}\n",
                " ".repeat(line_no.len()),
                red(underline)
            ));
        }
        out
    }
}

/// Render every error in order, one block per diagnostic.
pub fn format_errors(errors: &[CompileError], source: &str, filename: &str) -> String {
    errors
        .iter()
        .map(|e| Diagnostic::from_error(e, source, filename).render_ansi())
        .collect::<Vec<_>>()
        .join("\n")
}

fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}

fn yellow(s: &str) -> String {
    format!("\x1b[33m{}\x1b[0m", s)
}

fn cyan(s: &str) -> String {
    format!("\x1b[36m{}\x1b[0m", s)
}

fn gray(s: &str) -> String {
    format!("\x1b[90m{}\x1b[0m", s)
}

fn bold(s: &str) -> String {
    format!("\x1b[1m{}\x1b[0m", s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::error::ErrorKind;
    use crate::compiler::tokens::Span;

    #[test]
    fn renders_source_line_and_caret() {
        let source = "def x = ,1";
        let err = CompileError::new(
            ErrorKind::UnexpectedToken {
                found: ",".to_string(),
                expected: "expression".to_string(),
            },
            Span::new(8, 9, 1, 9),
        );
        let d = Diagnostic::from_error(&err, source, "test.quill");
        assert_eq!(d.line, 1);
        assert_eq!(d.source_line.as_deref(), Some("def x = ,1"));
        let rendered = d.render_ansi();
        assert!(rendered.contains("test.quill:1:9"));
        assert!(rendered.contains('^'));
    }
}
