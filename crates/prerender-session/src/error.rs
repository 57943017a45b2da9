use std::fmt;
use std::time::Duration;

use cdp_adapter::AdapterError;
use prerender_bundle::{BundleError, ManifestError};
use thiserror::Error;

/// Zero or more messages collected while one remote operation ran.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderError {
    messages: Vec<String>,
}

impl RenderError {
    pub fn new(messages: Vec<String>) -> Self {
        Self { messages }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// `Err` only when at least one message was collected.
    pub fn into_result(self) -> Result<(), RenderError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.messages.as_slice() {
            [] => write!(f, "no render errors"),
            [single] => write!(f, "{single}"),
            many => write!(f, "{} errors: {}", many.len(), many.join("; ")),
        }
    }
}

impl std::error::Error for RenderError {}

#[derive(Debug, Error)]
pub enum BootError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("bundle error: {0}")]
    Bundle(#[from] BundleError),
    #[error("browser error: {0}")]
    Browser(AdapterError),
    #[error("boot script failed: {0}")]
    Script(RenderError),
    #[error("boot did not finish within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Boot(#[from] BootError),
    #[error("render failed: {0}")]
    Render(#[from] RenderError),
    #[error("visit timed out after {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(AdapterError),
    #[error("session closed")]
    Closed,
    #[error("session failed: {0}")]
    Failed(String),
}

impl SessionError {
    /// Render and timeout errors leave the session usable; everything else
    /// means the session has to be discarded.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SessionError::Render(_) | SessionError::Timeout(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionError::Closed)
    }
}

impl From<AdapterError> for SessionError {
    fn from(err: AdapterError) -> Self {
        if err.is_closed() {
            SessionError::Closed
        } else {
            SessionError::Protocol(err)
        }
    }
}
