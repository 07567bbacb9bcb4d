use std::process::{Command, Output};

fn loxide() -> Command {
    Command::new(env!("CARGO_BIN_EXE_loxide"))
}

/// Runs the binary with inline source (the positional argument is treated
/// as source text when it names no file on disk).
fn eval(source: &str) -> Output {
    loxide().arg("--text").arg(source).output().expect("failed to run loxide")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// --- The canonical end-to-end scenarios ---

#[test]
fn arithmetic_and_precedence() {
    let out = eval("print 1 + 2 * 3;");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "7\n");
}

#[test]
fn string_concatenation_and_interning() {
    let out = eval("var a = \"foo\"; var b = \"bar\"; print a + b;");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "foobar\n");
}

#[test]
fn recursive_calls_and_conditionals() {
    let out = eval("fun f(n) { if (n < 2) return n; return f(n-1) + f(n-2); } print f(10);");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "55\n");
}

#[test]
fn closures_capture_and_close() {
    let out = eval(
        "fun mk() { var x = 0; fun inc() { x = x + 1; return x; } return inc; } \
         var c = mk(); print c(); print c();",
    );
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "1\n2\n");
}

#[test]
fn classes_initializers_and_bound_methods() {
    let out = eval(
        "class Greeter { init(name) { this.name = name; } \
         hi() { print \"hi \" + this.name; } } \
         Greeter(\"world\").hi();",
    );
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "hi world\n");
}

#[test]
fn runtime_type_error_exits_70_with_trace() {
    let out = eval("print 1 + \"a\";");
    assert_eq!(out.status.code(), Some(70));
    let err = stderr(&out);
    assert!(err.contains("Operands must be two numbers or two strings."), "stderr: {err}");
    assert!(err.contains("[line 1] in script"), "stderr: {err}");
}

// --- Exit codes & diagnostics ---

#[test]
fn compile_error_exits_65_with_formatted_diagnostic() {
    let out = eval("print 1 +;");
    assert_eq!(out.status.code(), Some(65));
    assert!(
        stderr(&out).contains("[line 1] Error at ';': Expect expression."),
        "stderr: {}",
        stderr(&out)
    );
}

#[test]
fn every_compile_error_is_reported() {
    let out = eval("var 1 = 2;\nvar 3 = 4;");
    assert_eq!(out.status.code(), Some(65));
    let err = stderr(&out);
    assert!(err.contains("[line 1]"), "stderr: {err}");
    assert!(err.contains("[line 2]"), "stderr: {err}");
}

#[test]
fn runtime_trace_lists_frames_innermost_first() {
    let out = eval("fun inner() { return 1 + nil; }\nfun outer() { inner(); }\nouter();");
    assert_eq!(out.status.code(), Some(70));
    let err = stderr(&out);
    let inner_at = err.find("in inner()").expect("inner frame");
    let outer_at = err.find("in outer()").expect("outer frame");
    let script_at = err.find("in script").expect("script frame");
    assert!(inner_at < outer_at && outer_at < script_at, "stderr: {err}");
}

#[test]
fn json_mode_emits_one_object_per_diagnostic() {
    let out = loxide()
        .arg("--json")
        .arg("print missing;")
        .output()
        .expect("failed to run loxide");
    assert_eq!(out.status.code(), Some(70));
    let err = stderr(&out);
    let object: serde_json::Value =
        serde_json::from_str(err.lines().next().expect("one line")).expect("valid JSON");
    assert_eq!(object["stage"], "runtime");
    assert_eq!(object["message"], "Undefined variable 'missing'.");
}

#[test]
fn conflicting_format_flags_are_a_usage_error() {
    let out = loxide()
        .arg("--json")
        .arg("--text")
        .arg("print 1;")
        .output()
        .expect("failed to run loxide");
    assert_eq!(out.status.code(), Some(64));
}

#[test]
fn too_many_arguments_show_usage() {
    let out = loxide()
        .arg("--text")
        .arg("print 1;")
        .arg("extra")
        .output()
        .expect("failed to run loxide");
    assert_eq!(out.status.code(), Some(64));
    assert!(stderr(&out).contains("Usage:"));
}

// --- Script files ---

#[test]
fn runs_a_script_file() {
    let dir = std::env::temp_dir();
    let path = dir.join("loxide_e2e_script.lox");
    std::fs::write(&path, "var x = 20;\nprint x * 2 + 2;\n").expect("write script");
    let out = loxide().arg("--text").arg(&path).output().expect("failed to run loxide");
    std::fs::remove_file(&path).ok();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "42\n");
}

// --- Language behavior worth pinning end-to-end ---

#[test]
fn loops_and_logic() {
    let out = eval("for (var i = 0; i < 5; i = i + 1) { if (i > 1 and i < 4) print i; }");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "2\n3\n");
}

#[test]
fn zero_is_truthy() {
    let out = eval("if (0) print \"truthy\"; else print \"falsy\";");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "truthy\n");
}

#[test]
fn clock_native_is_callable() {
    let out = eval("var t = clock(); print t >= 0;");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "true\n");
}

#[test]
fn garbage_heavy_program_completes() {
    let out = eval(
        "var s = \"\"; \
         for (var i = 0; i < 3000; i = i + 1) { s = s + \"0123456789abcdef\"; } \
         print \"survived\";",
    );
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "survived\n");
}
