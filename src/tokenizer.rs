//! Turns an input line into an [`Invocation`].
//!
//! The grammar is deliberately flat: tokens are separated by spaces, an
//! optional leading `fg` or `bg` picks the run mode, and a `>` token anywhere
//! requests output redirection. There is no quoting and no pipelines.

use crate::command::RunMode;
use crate::redirect;

/// One command line, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Command name first; never empty.
    pub tokens: Vec<String>,
    pub mode: RunMode,
    pub redirect: bool,
}

/// Split `src` on `delim`, dropping empty tokens.
pub fn tokenize(src: &str, delim: char) -> Vec<String> {
    src.split(delim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parse a line; `None` when there is nothing to run.
pub fn parse_line(line: &str) -> Option<Invocation> {
    let mut tokens = tokenize(line.trim_end_matches(['\n', '\r']), ' ');
    let mode = match tokens.first().map(String::as_str) {
        Some("bg") => RunMode::Background,
        _ => RunMode::Foreground,
    };
    if matches!(tokens.first().map(String::as_str), Some("fg" | "bg")) {
        tokens.remove(0);
    }
    if tokens.is_empty() {
        return None;
    }
    let redirect = redirect::requested(&tokens);
    Some(Invocation {
        tokens,
        mode,
        redirect,
    })
}
