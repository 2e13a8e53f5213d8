//! Output redirection suffix: `> destination`.

/// Token that starts a redirection suffix.
pub const REDIRECT_MARKER: &str = ">";

/// Where output should go once the suffix has been split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    /// The token following the marker.
    Path(String),
    /// The marker was the last token.
    MissingDestination,
}

/// Returns true if any token is the redirection marker.
pub fn requested(tokens: &[String]) -> bool {
    tokens.iter().any(|t| t == REDIRECT_MARKER)
}

/// Split `tokens` at the first marker.
///
/// Returns the argument vector with the marker and everything after it
/// dropped, plus the target if a marker was present.
pub fn split(tokens: &[String]) -> (&[String], Option<RedirectTarget>) {
    match tokens.iter().position(|t| t == REDIRECT_MARKER) {
        None => (tokens, None),
        Some(at) => {
            let target = match tokens.get(at + 1) {
                Some(dest) => RedirectTarget::Path(dest.clone()),
                None => RedirectTarget::MissingDestination,
            };
            (&tokens[..at], Some(target))
        }
    }
}
