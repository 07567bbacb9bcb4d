pub mod ansi;
pub mod json;

use crate::compiler::CompileError;
use crate::vm::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compile,
    Runtime,
}

/// A renderable diagnostic. `message` is the already-formatted first line;
/// runtime diagnostics also carry their stack trace, one line per frame.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub stage: Stage,
    pub message: String,
    pub line: Option<u32>,
    pub trace: Vec<String>,
}

impl Diagnostic {
    /// Plain-text rendering: exactly the lines the interpreter defines,
    /// newline-terminated.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.message);
        out.push('\n');
        for frame in &self.trace {
            out.push_str(frame);
            out.push('\n');
        }
        out
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Diagnostic {
        Diagnostic {
            stage: Stage::Compile,
            message: e.to_string(),
            line: Some(e.line),
            trace: Vec::new(),
        }
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Diagnostic {
        Diagnostic {
            stage: Stage::Runtime,
            message: e.message.clone(),
            line: None,
            trace: e.trace.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_compile_error_keeps_the_formatted_line() {
        let e = CompileError {
            line: 3,
            location: " at 'x'".to_string(),
            message: "Expect expression.".to_string(),
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.stage, Stage::Compile);
        assert_eq!(d.message, "[line 3] Error at 'x': Expect expression.");
        assert_eq!(d.line, Some(3));
        assert!(d.trace.is_empty());
    }

    #[test]
    fn from_runtime_error_carries_the_trace() {
        let e = RuntimeError {
            message: "Undefined variable 'x'.".to_string(),
            trace: vec!["[line 2] in f()".to_string(), "[line 5] in script".to_string()],
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.stage, Stage::Runtime);
        assert_eq!(d.message, "Undefined variable 'x'.");
        assert_eq!(d.trace.len(), 2);
    }

    #[test]
    fn render_text_is_one_line_per_entry() {
        let d = Diagnostic {
            stage: Stage::Runtime,
            message: "boom".to_string(),
            line: None,
            trace: vec!["[line 1] in script".to_string()],
        };
        assert_eq!(d.render_text(), "boom\n[line 1] in script\n");
    }
}
