use serde::Serialize;

use super::{Diagnostic, Stage};

fn trace_is_empty(trace: &&[String]) -> bool {
    trace.is_empty()
}

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    stage: &'static str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    #[serde(skip_serializing_if = "trace_is_empty")]
    trace: &'a [String],
}

/// One JSON object per diagnostic (NDJSON when several are emitted), so
/// tooling can parse a stream of errors line by line.
pub fn render(d: &Diagnostic) -> String {
    let json = JsonDiagnostic {
        stage: match d.stage {
            Stage::Compile => "compile",
            Stage::Runtime => "runtime",
        },
        message: &d.message,
        line: d.line,
        trace: &d.trace,
    };
    serde_json::to_string(&json).unwrap_or_else(|_| {
        r#"{"stage":"runtime","message":"internal error serializing diagnostic"}"#.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn renders_compile_diagnostics() {
        let d = Diagnostic {
            stage: Stage::Compile,
            message: "[line 1] Error at ';': Expect expression.".to_string(),
            line: Some(1),
            trace: Vec::new(),
        };
        let v = parse(&render(&d));
        assert_eq!(v["stage"], "compile");
        assert_eq!(v["line"], 1);
        assert!(v["message"].as_str().expect("message").contains("Expect expression."));
        assert!(v.get("trace").is_none());
    }

    #[test]
    fn renders_runtime_diagnostics_with_trace() {
        let d = Diagnostic {
            stage: Stage::Runtime,
            message: "Stack overflow.".to_string(),
            line: None,
            trace: vec!["[line 1] in f()".to_string(), "[line 2] in script".to_string()],
        };
        let v = parse(&render(&d));
        assert_eq!(v["stage"], "runtime");
        assert!(v.get("line").is_none());
        assert_eq!(v["trace"].as_array().expect("trace").len(), 2);
    }

    #[test]
    fn output_is_a_single_line() {
        let d = Diagnostic {
            stage: Stage::Runtime,
            message: "boom".to_string(),
            line: None,
            trace: vec!["[line 1] in script".to_string()],
        };
        assert!(!render(&d).contains('\n'));
    }
}
