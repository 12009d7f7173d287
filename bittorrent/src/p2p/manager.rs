use std::{net::SocketAddr, ops::Range, sync::Arc, time::Duration};
use mio::{net::TcpListener, Poll};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use crate::Config;
use super::{
    channels::{Channels, SocketHandles},
    processor,
    settings::Settings,
    worker::{EventLoopWorker, SharedChannels, WorkerHandle, WorkerParams},
    AdmissionPolicy, AllowAll, ChannelListenerFactory, ConnectTask, ManagerError, Result,
    WorkerState, WriteTask,
};

// How long shutdown waits for the loop to let go of its channels before
// shutting their sockets down from the outside.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Owns the peer listener and the event loop that serves every peer socket.
///
/// Lifecycle: [`bind`](Self::bind) a port, [`start`](Self::start) the loop on
/// a tokio runtime, submit tasks, then [`shutdown`](Self::shutdown).
pub struct ConnectionManager {

    config: Config,

    settings: Arc<Settings>,

    // Moves into the worker on start.
    poll: Option<Poll>,

    channels: SharedChannels,

    // Reachable without the channel lock.
    handles: SocketHandles,

    listeners: Arc<dyn ChannelListenerFactory>,

    incoming: Arc<dyn AdmissionPolicy>,

    outgoing: Arc<dyn AdmissionPolicy>,

    bind_port: Option<u16>,

    initialized: bool,

    worker: Option<WorkerHandle>,

}

impl ConnectionManager {

    pub fn new(config: Config, listeners: Arc<dyn ChannelListenerFactory>) -> Result<Self> {
        let poll = Poll::new()?;
        let handles = SocketHandles::default();
        let channels = Channels::new(poll.registry().try_clone()?, handles.clone());
        Ok(Self {
            settings: Arc::new(Settings::new(&config)),
            config,
            poll: Some(poll),
            channels: Arc::new(Mutex::new(Some(channels))),
            handles,
            listeners,
            incoming: Arc::new(AllowAll),
            outgoing: Arc::new(AllowAll),
            bind_port: None,
            initialized: false,
            worker: None,
        })
    }

    // Separate policies so incoming and outgoing peers can be capped apart.
    pub fn with_admission(
        mut self,
        incoming: Arc<dyn AdmissionPolicy>,
        outgoing: Arc<dyn AdmissionPolicy>,
    ) -> Self {
        self.incoming = incoming;
        self.outgoing = outgoing;
        self
    }

    /// Binds the first free port in `ports`, trying them in ascending order.
    /// Port 0 in the range binds an ephemeral port.
    #[tracing::instrument(skip(self))]
    pub fn bind(&mut self, ports: Range<u16>) -> Result<u16> {
        if self.initialized {
            return Err(ManagerError::AlreadyInitialized);
        }
        let mut guard = self.channels.lock();
        let channels = guard.as_mut().ok_or(ManagerError::AlreadyInitialized)?;

        for port in ports.clone() {
            let address = SocketAddr::new(self.config.listen_ip, port);
            match TcpListener::bind(address) {
                Ok(listener) => {
                    let bound = listener.local_addr()?.port();
                    channels.set_server(listener, self.listeners.clone());
                    self.bind_port = Some(bound);
                    tracing::info!("listening for peers on {}", SocketAddr::new(self.config.listen_ip, bound));
                    return Ok(bound);
                },
                Err(e) => {
                    tracing::debug!("could not bind to port {}, trying next port: {}", port, e);
                },
            }
        }

        Err(ManagerError::NoPortAvailable { start: ports.start, end: ports.end })
    }

    /// Registers the listener and hands the event loop to `runtime` as a
    /// blocking task. Only ever succeeds once.
    pub fn start(&mut self, runtime: &Handle) -> Result<()> {
        if self.bind_port.is_none() {
            return Err(ManagerError::NotBound);
        }
        if std::mem::replace(&mut self.initialized, true) {
            return Err(ManagerError::AlreadyInitialized);
        }
        let poll = self.poll.take().ok_or(ManagerError::AlreadyInitialized)?;

        self.channels
            .lock()
            .as_mut()
            .ok_or(ManagerError::AlreadyInitialized)?
            .register_server()?;

        let (worker, handle) = EventLoopWorker::new(WorkerParams {
            poll,
            channels: self.channels.clone(),
            processors: processor::chain(
                self.settings.clone(),
                self.incoming.clone(),
                self.outgoing.clone(),
                self.config.read_buffer_size,
            ),
            settings: self.settings.clone(),
            queue_capacity: self.config.queue_capacity,
            max_events: self.config.max_events,
        })?;

        let span = tracing::info_span!("connection worker", port = self.bind_port);
        // Blocking tasks cannot be aborted; the loop ends through its own
        // state, or the runtime waits it out.
        runtime.spawn_blocking(move || {
            let _enter = span.enter();
            worker.run()
        });
        self.worker = Some(handle);
        Ok(())
    }

    /// Queues an outbound connection. False if the loop is not running or the
    /// queue stayed full for `timeout`; the task is dropped in that case.
    pub fn submit_connect(&self, task: ConnectTask, timeout: Duration) -> bool {
        match &self.worker {
            Some(worker) => worker.offer_connect(task, timeout),
            None => false,
        }
    }

    /// Queues bytes for an established channel, same contract as
    /// [`submit_connect`](Self::submit_connect).
    pub fn submit_write(&self, task: WriteTask, timeout: Duration) -> bool {
        match &self.worker {
            Some(worker) => worker.offer_write(task, timeout),
            None => false,
        }
    }

    pub fn bind_port(&self) -> Option<u16> {
        self.bind_port
    }

    pub fn state(&self) -> WorkerState {
        match &self.worker {
            Some(worker) => worker.state(),
            None if self.initialized => WorkerState::Stopped,
            None => WorkerState::Created,
        }
    }

    // True once every socket and the selector have been released.
    pub fn is_closed(&self) -> bool {
        self.channels.lock().is_none() && self.poll.is_none()
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn set_cleanup_interval(&self, interval: Duration) {
        self.settings.set_cleanup_interval(interval);
    }

    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.settings.idle_timeout.set(timeout);
    }

    pub fn set_select_timeout(&self, timeout: Duration) {
        self.settings.set_select_timeout(timeout);
    }

    pub fn set_send_buffer_size(&self, size: usize) {
        self.settings.set_send_buffer_size(size);
    }

    pub fn set_receive_buffer_size(&self, size: usize) {
        self.settings.set_receive_buffer_size(size);
    }

    /// Stops the loop, waiting up to `timeout` for it to exit, then closes the
    /// listener and every channel regardless. If the loop is stuck inside a
    /// listener and keeps hold of its channels, their sockets are shut down
    /// from here and the selector goes away once the loop returns. Returns
    /// false if the loop did not stop in time or anything failed to close.
    #[tracing::instrument(skip(self))]
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        tracing::debug!("try close connection manager...");
        let mut closed = true;

        if let Some(worker) = self.worker.take() {
            worker.stop();
            if !worker.await_termination(timeout) {
                tracing::warn!("unable to terminate worker in {:?}", timeout);
                closed = false;
            }
        }

        match self.channels.try_lock_for(FORCE_CLOSE_GRACE) {
            Some(mut guard) => {
                if let Some(mut channels) = guard.take() {
                    closed &= channels.close_all();
                }
            },
            None => {
                tracing::error!("event loop still holds its channels, shutting down {} sockets", self.handles.len());
                self.handles.shutdown_all();
                closed = false;
            },
        }
        // Only still here if the worker never started.
        self.poll = None;

        if closed {
            tracing::debug!("connection manager is successfully closed");
        } else {
            tracing::error!("connection manager wasn't closed successfully");
        }
        closed
    }

    pub fn close(&mut self) -> bool {
        self.shutdown(self.config.shutdown_timeout)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // A loop stuck in a listener keeps the lock; shutdown copes with that.
        let open = self.channels.try_lock().map_or(true, |channels| channels.is_some());
        if open || self.poll.is_some() {
            self.shutdown(Duration::ZERO);
        }
    }
}
