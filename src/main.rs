#![warn(clippy::all)]

mod chunk;
#[cfg_attr(
    not(any(feature = "trace-execution", feature = "print-code")),
    allow(dead_code)
)]
mod debug;
mod compiler;
mod diagnostic;
mod lexer;
mod memory;
mod object;
mod table;
mod value;
mod vm;

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::exit;

use diagnostic::{ansi::AnsiRenderer, json, Diagnostic};
use vm::{InterpretError, Vm};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Ansi,
    Text,
    Json,
}

/// Scan args for --json/-j, --text/-t, --ansi/-a. Return (mode, remaining).
/// Multiple format flags → usage error.
fn detect_output_mode(args: Vec<String>) -> (OutputMode, Vec<String>) {
    let mut mode: Option<OutputMode> = None;
    let mut remaining = Vec::with_capacity(args.len());
    let mut conflict = false;

    for arg in args {
        let picked = match arg.as_str() {
            "--json" | "-j" => Some(OutputMode::Json),
            "--text" | "-t" => Some(OutputMode::Text),
            "--ansi" | "-a" => Some(OutputMode::Ansi),
            _ => {
                remaining.push(arg);
                None
            }
        };
        if picked.is_some() {
            if mode.is_some() {
                conflict = true;
            } else {
                mode = picked;
            }
        }
    }

    if conflict {
        eprintln!("error: --json, --text, and --ansi are mutually exclusive");
        exit(64);
    }

    let resolved = mode.unwrap_or_else(|| {
        // Auto-detect: tty && !NO_COLOR → Ansi; tty && NO_COLOR → Text;
        // piped/redirected → Json (one object per line).
        // SAFETY: isatty(2) is safe for any fd; it returns 0 on error or
        // when the fd is not a terminal.
        let is_tty = unsafe { libc::isatty(libc::STDERR_FILENO) } != 0;
        let no_color = std::env::var("NO_COLOR").is_ok();
        if is_tty && !no_color {
            OutputMode::Ansi
        } else if is_tty {
            OutputMode::Text
        } else {
            OutputMode::Json
        }
    });

    (resolved, remaining)
}

fn report(d: &Diagnostic, mode: OutputMode) {
    let rendered = match mode {
        OutputMode::Ansi => AnsiRenderer { use_color: true }.render(d),
        OutputMode::Text => d.render_text(),
        OutputMode::Json => format!("{}\n", json::render(d)),
    };
    eprint!("{rendered}");
}

fn report_error(error: &InterpretError, mode: OutputMode) {
    match error {
        InterpretError::Compile(errors) => {
            for e in errors {
                report(&Diagnostic::from(e), mode);
            }
        }
        InterpretError::Runtime(e) => report(&Diagnostic::from(e), mode),
    }
}

fn main() {
    let raw_args: Vec<String> = std::env::args().collect();
    let (mode, args) = detect_output_mode(raw_args);

    match args.len() {
        1 => repl(mode),
        2 => run_source(&args[1], mode),
        _ => {
            eprintln!("Usage: loxide [--ansi|--text|--json] [script-or-source]");
            exit(64);
        }
    }
}

/// Runs a script. The argument is a file path when one exists on disk;
/// anything else is treated as inline source text.
fn run_source(arg: &str, mode: OutputMode) {
    let source = if Path::new(arg).is_file() {
        match std::fs::read_to_string(arg) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("Could not read \"{arg}\": {e}");
                exit(74);
            }
        }
    } else {
        arg.to_string()
    };

    let mut vm = Vm::new();
    let mut stdout = io::stdout();
    match vm.interpret(&source, &mut stdout) {
        Ok(()) => {}
        Err(error) => {
            report_error(&error, mode);
            match error {
                InterpretError::Compile(_) => exit(65),
                InterpretError::Runtime(_) => exit(70),
            }
        }
    }
}

fn repl(mode: OutputMode) {
    let mut vm = Vm::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        if stdout.flush().is_err() {
            return;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                println!();
                return;
            }
            Ok(_) => {}
        }
        // Errors are reported and the session continues; globals survive
        // from line to line.
        if let Err(error) = vm.interpret(&line, &mut stdout) {
            report_error(&error, mode);
        }
    }
}
