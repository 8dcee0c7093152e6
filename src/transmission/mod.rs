//! Streaming transmission of gait records to a remote collector.
//!
//! Records travel as JSON text frames over one WebSocket connection per
//! session key. Delivery is fire-and-forget: failures land in an error sink and
//! in the observable [`ConnectionState`], never in the caller's control flow.

pub mod channel;
pub mod payload;

pub use channel::TransmissionChannel;
pub use payload::{CollectorAck, GaitPayload, HistoricalBatch, RecordKind};

/// Connection lifecycle as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Transmission failures reported to the error sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmissionError {
    /// The connection could not be opened or broke during a read or send
    Transport(String),
    /// A send was attempted while no connection was established
    NotConnected,
    /// A payload could not be encoded
    Serialization(String),
    /// The connection was closed before the operation finished
    Closed,
}

impl std::fmt::Display for TransmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransmissionError::Transport(msg) => write!(f, "Transport failure: {msg}"),
            TransmissionError::NotConnected => write!(f, "Not connected to collector"),
            TransmissionError::Serialization(msg) => write!(f, "Serialization failure: {msg}"),
            TransmissionError::Closed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for TransmissionError {}
