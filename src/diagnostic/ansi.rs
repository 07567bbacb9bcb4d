use super::Diagnostic;

/// Renders diagnostics for a terminal. With color off this is byte-for-byte
/// the plain-text format; with color on, the first line is emphasized and
/// the stack trace dimmed.
pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold_red(&self, s: &str) -> String {
        if self.use_color {
            format!("\x1b[1;31m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color {
            format!("\x1b[2m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();
        out.push_str(&self.bold_red(&d.message));
        out.push('\n');
        for frame in &d.trace {
            out.push_str(&self.dim(frame));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Stage;

    fn sample() -> Diagnostic {
        Diagnostic {
            stage: Stage::Runtime,
            message: "Operand must be a number.".to_string(),
            line: None,
            trace: vec!["[line 1] in script".to_string()],
        }
    }

    #[test]
    fn without_color_matches_plain_text() {
        let r = AnsiRenderer { use_color: false };
        assert_eq!(r.render(&sample()), sample().render_text());
    }

    #[test]
    fn with_color_wraps_in_escape_codes() {
        let r = AnsiRenderer { use_color: true };
        let out = r.render(&sample());
        assert!(out.contains("\x1b[1;31m"));
        assert!(out.contains("Operand must be a number."));
        assert!(out.contains("[line 1] in script"));
    }

    #[test]
    fn without_color_has_no_escape_codes() {
        let r = AnsiRenderer { use_color: false };
        assert!(!r.render(&sample()).contains('\x1b'));
    }
}
