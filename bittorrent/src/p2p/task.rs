use std::{fmt, net::SocketAddr, time::Duration};
use bytes::Bytes;
use crate::ID;
use super::{ChannelId, ConnectionListener, WriteListener};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// Request to open an outbound connection.
pub struct ConnectTask {

    pub address: SocketAddr,

    pub peer_id: Option<ID>,

    // Pending connects older than this are closed by the sweep.
    pub timeout: Duration,

    pub listener: Box<dyn ConnectionListener>,

}

impl ConnectTask {

    pub fn new(address: SocketAddr, listener: impl ConnectionListener + 'static) -> Self {
        Self {
            address,
            peer_id: None,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            listener: Box::new(listener),
        }
    }

    pub fn with_peer_id(mut self, peer_id: ID) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for ConnectTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTask")
            .field("address", &self.address)
            .field("peer_id", &self.peer_id.map(hex::encode))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// Bytes to flush on an established channel. Writes to one channel go out in
// submission order.
pub struct WriteTask {

    pub channel: ChannelId,

    pub data: Bytes,

    pub listener: Box<dyn WriteListener>,

}

impl WriteTask {

    pub fn new(
        channel: ChannelId,
        data: impl Into<Bytes>,
        listener: impl WriteListener + 'static,
    ) -> Self {
        Self {
            channel,
            data: data.into(),
            listener: Box::new(listener),
        }
    }
}

impl fmt::Debug for WriteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTask")
            .field("channel", &self.channel)
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}
