//! Value types shared by the socket, the state machine and the bridge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A WebSocket close code, drawn from the standard close-code space.
///
/// Only the codes in [`CloseCode::RETRYABLE`] make the state machine schedule a reconnect
/// with backoff; every other code ends the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloseCode(u16);

impl CloseCode {
    /// 1000: normal closure.
    pub const NORMAL: Self = Self(1000);
    /// 1001: endpoint going away.
    pub const GOING_AWAY: Self = Self(1001);
    /// 1005: close frame carried no status code.
    pub const NO_STATUS: Self = Self(1005);
    /// 1006: connection dropped without a close frame.
    pub const ABNORMAL: Self = Self(1006);
    /// 1013: server overloaded, try again later.
    pub const TRY_AGAIN_LATER: Self = Self(1013);

    /// Close codes that trigger a backoff reconnect.
    pub const RETRYABLE: [Self; 5] = [
        Self::NORMAL,
        Self::GOING_AWAY,
        Self::NO_STATUS,
        Self::ABNORMAL,
        Self::TRY_AGAIN_LATER,
    ];

    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Whether a close with this code is followed by an automatic reconnect.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self.0, 1000 | 1001 | 1005 | 1006 | 1013)
    }
}

impl Default for CloseCode {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.0
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single WebSocket data frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// The text content, if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}
