//! Platform-specific command line construction.

/// Target platform conventions for building a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// The program and arguments actually handed to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Arguments are pre-quoted for a shell and must be passed verbatim.
    pub via_shell: bool,
}

/// Build the argv for `platform`.
///
/// Unix spawns directly. Windows spawns directly too unless the program or an
/// argument contains whitespace, in which case the line goes through
/// `cmd.exe /D /S /C "<line>"` with every whitespace-bearing token
/// double-quoted. `/S` makes cmd strip exactly the outer pair of quotes, so
/// the quoting inside the line survives.
pub fn build_argv(platform: Platform, program: &str, args: &[String]) -> Invocation {
    let needs_shell = platform == Platform::Windows
        && (has_whitespace(program) || args.iter().any(|a| has_whitespace(a)));

    if !needs_shell {
        return Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            via_shell: false,
        };
    }

    let line = std::iter::once(quote_windows(program))
        .chain(args.iter().map(|a| quote_windows(a)))
        .collect::<Vec<_>>()
        .join(" ");
    Invocation {
        program: "cmd.exe".to_string(),
        args: vec!["/D".into(), "/S".into(), "/C".into(), format!("\"{line}\"")],
        via_shell: true,
    }
}

fn has_whitespace(s: &str) -> bool {
    s.chars().any(char::is_whitespace)
}

fn quote_windows(token: &str) -> String {
    if !has_whitespace(token) || (token.starts_with('"') && token.ends_with('"') && token.len() > 1) {
        return token.to_string();
    }
    format!("\"{}\"", token.replace('"', "\\\""))
}
