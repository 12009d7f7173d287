use std::{
    io,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};
use mio::net::TcpStream;
use socket2::SockRef;
use crate::Config;
use super::policy::{millis, IdleTimeout};

// Values the event loop re-reads every cycle, so they can be changed while it
// runs. All loads and stores are relaxed.
#[derive(Debug)]
pub struct Settings {

    select_timeout: AtomicU64,

    cleanup_interval: AtomicU64,

    pub idle_timeout: IdleTimeout,

    send_buffer_size: AtomicUsize,

    receive_buffer_size: AtomicUsize,

}

impl Settings {

    pub fn new(config: &Config) -> Self {
        Self {
            select_timeout: AtomicU64::new(millis(config.select_timeout)),
            cleanup_interval: AtomicU64::new(millis(config.cleanup_interval)),
            idle_timeout: IdleTimeout::new(config.idle_timeout),
            send_buffer_size: AtomicUsize::new(config.send_buffer_size),
            receive_buffer_size: AtomicUsize::new(config.receive_buffer_size),
        }
    }

    pub fn select_timeout(&self) -> Duration {
        Duration::from_millis(self.select_timeout.load(Ordering::Relaxed))
    }

    pub fn set_select_timeout(&self, timeout: Duration) {
        self.select_timeout.store(millis(timeout), Ordering::Relaxed);
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval.load(Ordering::Relaxed))
    }

    pub fn set_cleanup_interval(&self, interval: Duration) {
        self.cleanup_interval.store(millis(interval), Ordering::Relaxed);
    }

    pub fn send_buffer_size(&self) -> usize {
        self.send_buffer_size.load(Ordering::Relaxed)
    }

    pub fn set_send_buffer_size(&self, size: usize) {
        self.send_buffer_size.store(size, Ordering::Relaxed);
    }

    pub fn receive_buffer_size(&self) -> usize {
        self.receive_buffer_size.load(Ordering::Relaxed)
    }

    pub fn set_receive_buffer_size(&self, size: usize) {
        self.receive_buffer_size.store(size, Ordering::Relaxed);
    }

    // Applied to every admitted socket, inbound or outbound.
    pub(crate) fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        let socket = SockRef::from(stream);
        let send = self.send_buffer_size();
        if send > 0 {
            socket.set_send_buffer_size(send)?;
        }
        let receive = self.receive_buffer_size();
        if receive > 0 {
            socket.set_recv_buffer_size(receive)?;
        }
        Ok(())
    }
}
