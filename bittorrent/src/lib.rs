mod config;
pub mod p2p;
pub mod tracker;

// 20 byte SHA1 info hash or peer id.
pub type ID = [u8; 20];

// Re-exports
pub use config::{Config, PORT_RANGE_END, PORT_RANGE_START};
pub use p2p::{
    AdmissionPolicy,
    AllowAll,
    Channel,
    ChannelId,
    ChannelListenerFactory,
    ConnectTask,
    ConnectionError,
    ConnectionLimit,
    ConnectionListener,
    ConnectionManager,
    Direction,
    ManagerError,
    WriteListener,
    WriteTask,
};
