//! Server lifecycle events.
//!
//! Every event is also logged through `tracing`; the broadcast channel lets
//! embedders and tests observe the same stream without a log subscriber.

use std::net::SocketAddr;

use tokio::sync::broadcast;

/// Buffer size of the event channel. Slow subscribers see `Lagged`.
pub const EVENT_BUFFER: usize = 256;

/// Something that happened in the listener or in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The listener is bound and accepting.
    Listening { addr: SocketAddr },

    /// A client connected.
    Connected { connection: u64, peer: SocketAddr },

    /// A command line arrived.
    CommandReceived { connection: u64, command: String },

    /// A command was answered successfully.
    CommandCompleted {
        connection: u64,
        command: String,
        /// Short result, e.g. bytes sent or the signal status line
        outcome: String,
    },

    /// A command failed and the client got an error reply.
    CommandFailed {
        connection: u64,
        command: String,
        error: String,
    },

    /// A client session ended.
    Disconnected {
        connection: u64,
        peer: SocketAddr,
        /// `None` for a clean close, else the fatal error
        reason: Option<String>,
    },

    /// The listener stopped accepting.
    Stopped,
}

/// Sending half of the event channel.
pub type EventSender = broadcast::Sender<ServerEvent>;

/// Creates the event channel.
pub fn event_channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_BUFFER);
    tx
}

/// Publishes an event; having no subscribers is not an error.
pub(crate) fn publish(events: &EventSender, event: ServerEvent) {
    let _ = events.send(event);
}
