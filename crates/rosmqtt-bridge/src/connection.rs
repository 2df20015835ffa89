//! Broker connection state.
//!
//! ```text
//!                Connect              Connected
//! Disconnected ----------> Connecting ---------> Connected
//!      ^                       |                     |
//!      |      ConnectionLost   |   ConnectionLost    |
//!      +-----------------------+---------------------+
//! ```
//!
//! The state is read from bus callback threads on every outbound message,
//! so it is kept in an atomic and reading it never blocks.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt started.
    Connect,
    /// The broker accepted the connection.
    Connected,
    /// The attempt failed or an established connection dropped.
    ConnectionLost,
}

impl ConnectionState {
    /// The state after `event`.
    pub fn on(self, event: ConnectionEvent) -> ConnectionState {
        match (self, event) {
            (_, ConnectionEvent::ConnectionLost) => ConnectionState::Disconnected,
            (_, ConnectionEvent::Connected) => ConnectionState::Connected,
            (ConnectionState::Disconnected, ConnectionEvent::Connect) => {
                ConnectionState::Connecting
            }
            // An attempt while connecting or connected changes nothing.
            (state, ConnectionEvent::Connect) => state,
        }
    }

    fn from_u8(raw: u8) -> ConnectionState {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// A state change produced by [`ConnectionMonitor::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Lock-free holder of the current [`ConnectionState`].
#[derive(Debug)]
pub struct ConnectionMonitor {
    state: AtomicU8,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn apply(&self, event: ConnectionEvent) -> Transition {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = ConnectionState::from_u8(current);
            let to = from.on(event);
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Transition { from, to },
                Err(actual) => current = actual,
            }
        }
    }
}
