use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level error categories surfaced by the link layer.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkErrorKind {
    #[error("connect failed")]
    ConnectFailed,
    #[error("request not delivered in time")]
    DeliveryTimeout,
    #[error("request superseded by a newer one")]
    Superseded,
    #[error("request cancelled by close")]
    Cancelled,
    #[error("link closed")]
    Closed,
    #[error("run did not finish in time")]
    RunTimeout,
    #[error("protocol violation")]
    Protocol,
    #[error("http request failed")]
    Http,
    #[error("invalid configuration")]
    Config,
    #[error("internal error")]
    Internal,
}

/// Error value returned by every fallible link operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkError {
    pub kind: LinkErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for LinkError {}

impl LinkError {
    pub fn new(kind: LinkErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn kind(&self) -> LinkErrorKind {
        self.kind
    }

    /// The driver task is gone; every handle operation fails the same way.
    pub(crate) fn driver_gone() -> Self {
        Self::new(LinkErrorKind::Closed).with_hint("connection driver stopped")
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        let retriable = err.is_timeout() || err.is_connect();
        LinkError::new(LinkErrorKind::Http)
            .with_hint(err.to_string())
            .retriable(retriable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_hint() {
        let err = LinkError::new(LinkErrorKind::ConnectFailed).with_hint("refused");
        assert_eq!(err.to_string(), "connect failed: refused");
        assert_eq!(
            LinkError::new(LinkErrorKind::Superseded).to_string(),
            "request superseded by a newer one"
        );
    }
}
