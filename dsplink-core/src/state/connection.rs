//! Link connection state machine.
//!
//! Provides a `ConnectionState` enum that models the lifecycle of one
//! link, with validated transitions that return `Result` instead of
//! panicking.

use std::fmt;

use crate::error::LinkError;

// ── ConnectionState ──────────────────────────────────────────────

/// The current state of a link.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected ──► Faulted
///       ▲               │              │            │
///       └───────────────┴──────────────┴────────────┘
///                  open failure / disconnect / DFU
/// ```
///
/// `Faulted` is only left through an explicit disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No active connection. Initial state.
    #[default]
    Disconnected,

    /// The transport is being opened.
    Connecting,

    /// The dispatcher is running and accepting commands.
    Connected,

    /// The transport failed; the link refuses to connect until it is
    /// disconnected.
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Faulted => write!(f, "Faulted"),
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            Self::Faulted => Err(LinkError::Faulted),
            _ => Err(LinkError::ProtocolViolation(
                "cannot connect: link is not disconnected",
            )),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err(LinkError::ProtocolViolation(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// Transition to `Faulted`.
    ///
    /// Valid from: `Connected`. Other states are left alone, so a fault
    /// reported after a disconnect does not resurrect the link.
    pub fn fault(&mut self) -> bool {
        if self.is_connected() {
            *self = Self::Faulted;
            true
        } else {
            false
        }
    }

    /// Force-reset to `Disconnected` regardless of current state.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────
