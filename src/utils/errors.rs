use thiserror::Error;

use crate::selector::SelectorError;

/// Failures reported by the watcher
///
/// None of these are returned from `Watcher::watch()`. They are logged and
/// handed to the optional error reporter, and the watcher keeps going.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Invalid selector '{selector}': {source}")]
    InvalidSelector {
        selector: String,
        #[source]
        source: SelectorError,
    },

    #[error("Selector '{selector}' never matched (gave up after {waited_ms}ms)")]
    SelectorNeverMatched { selector: String, waited_ms: u64 },

    #[error("on_ready callback failed for '{selector}': {source}")]
    CallbackFailure {
        selector: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("on_ready callback panicked for '{selector}': {message}")]
    CallbackPanicked { selector: String, message: String },

    #[error("Selector '{selector}' matched but never settled (gave up after {waited_ms}ms)")]
    NeverSettled { selector: String, waited_ms: u64 },

    #[error("Browser error: {0}")]
    BrowserError(String),
}

impl WatchError {
    /// Selector of the request this failure belongs to
    pub fn selector(&self) -> Option<&str> {
        match self {
            WatchError::InvalidSelector { selector, .. }
            | WatchError::SelectorNeverMatched { selector, .. }
            | WatchError::NeverSettled { selector, .. }
            | WatchError::CallbackFailure { selector, .. }
            | WatchError::CallbackPanicked { selector, .. } => Some(selector),
            WatchError::BrowserError(_) => None,
        }
    }
}

/// Implement From<chromiumoxide::error::CdpError> for WatchError
impl From<chromiumoxide::error::CdpError> for WatchError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        WatchError::BrowserError(err.to_string())
    }
}

/// Errors from the session helpers (bundle lookup, duration endpoint)
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Event bundle is missing '{0}'")]
    MissingBundleField(&'static str),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Unexpected status {status} from {url}")]
    BadStatus { status: u16, url: String },
}

/// Implement From<reqwest::Error> for SessionError
impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::HttpError(err.to_string())
    }
}
