//! Peer connection manager.
//!
//! A single thread owns every peer socket. It polls a mio selector, hands each
//! ready socket to the first matching [`processor`], and periodically sweeps
//! idle sockets. Other threads never touch sockets directly: they submit
//! [`ConnectTask`]s and [`WriteTask`]s through the [`ConnectionManager`] and
//! hear back through listener callbacks.
//!
//! Listener callbacks run inline on the event loop thread. They must not
//! block, and must not submit a task and then wait for its completion, since
//! that completion can only be delivered by the thread they are blocking.
//! A callback that panics costs only its own channel: the listener is dropped
//! without another call, the channel closes, and writes still queued on it
//! fail with [`ConnectionError::Cancelled`].

use std::{fmt, net::SocketAddr};
use crate::ID;

mod attachment;
mod channels;
mod cleanup;
mod manager;
mod policy;
mod processor;
mod queue;
mod settings;
mod task;
mod worker;
#[cfg(test)]
mod tests;

pub use manager::ConnectionManager;
pub use policy::{AdmissionPolicy, AllowAll, ConnectionLimit, IdleTimeout};
pub use settings::Settings;
pub use task::{ConnectTask, WriteTask, DEFAULT_CONNECT_TIMEOUT};
pub use worker::WorkerState;

pub type Result<T, E = ManagerError> = std::result::Result<T, E>;

// Errors that halt the whole manager. Everything that goes wrong with a
// single peer is a `ConnectionError` instead.
#[derive(thiserror::Error, Debug)]
pub enum ManagerError {

    #[error("no available port in {start}..{end} for the BitTorrent client")]
    NoPortAvailable {
        start: u16,
        end: u16,
    },

    #[error("connection manager was already initialized")]
    AlreadyInitialized,

    #[error("connection manager has no bound listener")]
    NotBound,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

}

// Delivered to listeners, never returned to callers.
#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {

    #[error("channel was cancelled")]
    Cancelled,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection idle for longer than the idle timeout")]
    IdleTimeout,

    #[error("connection attempt timed out")]
    ConnectTimeout,

    #[error("connection closed by peer")]
    ClosedByPeer,

    #[error("connection rejected by admission policy")]
    Rejected,

    #[error("channel is not registered or not yet established")]
    UnknownChannel,

    #[error("connection manager shut down")]
    Shutdown,

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) usize);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

// Identity of a registered peer socket, handed to every callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {

    pub id: ChannelId,

    pub peer: SocketAddr,

    pub direction: Direction,

    // Known up front for outbound connections only.
    pub peer_id: Option<ID>,

}

/// Protocol hook for one peer socket, invoked on the event loop thread.
pub trait ConnectionListener: Send {

    /// The socket was admitted and is now readable. Writes may be submitted
    /// for `channel.id` from here on.
    fn on_connected(&mut self, _channel: &Channel) {}

    fn on_data(&mut self, channel: &Channel, data: &[u8]);

    /// Called at most once. The channel is already closed.
    fn on_error(&mut self, channel: &Channel, error: &ConnectionError);

}

/// Completion hook for a single [`WriteTask`].
pub trait WriteListener: Send {

    fn on_write_complete(&mut self, channel: ChannelId);

    fn on_write_failed(&mut self, _channel: ChannelId, _error: &ConnectionError) {}

}

// For writes nobody waits on.
impl WriteListener for () {
    fn on_write_complete(&mut self, _channel: ChannelId) {}
}

/// Creates the protocol listener for each admitted inbound socket.
pub trait ChannelListenerFactory: Send + Sync {

    fn create_listener(&self, channel: &Channel) -> Box<dyn ConnectionListener>;

}
