use std::{
    net::{IpAddr, Ipv4Addr},
    ops::Range,
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct Config {

    // Address the peer listener binds to.
    pub listen_ip: IpAddr,

    // Ports tried in ascending order, end exclusive.
    pub port_range: Range<u16>,

    // Upper bound on a single select call.
    pub select_timeout: Duration,

    // How often idle sockets are swept.
    pub cleanup_interval: Duration,

    // Sockets without activity for longer than this are closed by the sweep.
    pub idle_timeout: Duration,

    // 0 leaves the OS default in place.
    pub send_buffer_size: usize,

    pub receive_buffer_size: usize,

    // Capacity of each of the connect and write queues.
    pub queue_capacity: usize,

    pub read_buffer_size: usize,

    // Events handled per select call.
    pub max_events: usize,

    // Used by `ConnectionManager::close`.
    pub shutdown_timeout: Duration,

}

pub const PORT_RANGE_START: u16 = 6881;
pub const PORT_RANGE_END: u16 = 6889;

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_ip: Ipv4Addr::UNSPECIFIED.into(),
            port_range: PORT_RANGE_START..PORT_RANGE_END,
            select_timeout: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(120),
            send_buffer_size: 0,
            receive_buffer_size: 0,
            queue_capacity: 2000,
            read_buffer_size: 0x4000,
            max_events: 1024,
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}
