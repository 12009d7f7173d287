use std::{
    collections::HashMap,
    io,
    net::{Shutdown, SocketAddr},
    sync::Arc,
    time::Instant,
};
use mio::{
    net::{TcpListener, TcpStream},
    Interest, Registry, Token,
};
use parking_lot::Mutex;
use socket2::{SockRef, Socket};
use super::{
    attachment::{notify, AcceptAttachment, Attachment, ConnectAttachment, PendingWrite, ReadAttachment},
    Channel, ChannelId, ChannelListenerFactory, ConnectTask, ConnectionError, ConnectionListener,
    Direction, WriteTask,
};

pub(crate) const LISTENER: Token = Token(0);
pub(crate) const WAKER: Token = Token(1);
const FIRST_CHANNEL: usize = 2;

pub(crate) struct Server {

    pub listener: TcpListener,

    pub attachment: AcceptAttachment,

    registered: bool,

}

pub(crate) struct Registration {

    pub stream: TcpStream,

    pub interest: Interest,

    pub attachment: Attachment,

    // Cleared on close; the entry itself is purged at the end of the phase.
    valid: bool,

}

impl Registration {

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    // Connecting sockets wait for writability only; established ones always
    // read and also write while something is queued.
    pub fn role_matches_interest(&self) -> bool {
        match &self.attachment {
            Attachment::Connect(_) => self.interest == Interest::WRITABLE,
            Attachment::Read(read) => {
                self.interest.is_readable()
                    && self.interest.is_writable() == !read.pending.is_empty()
            },
        }
    }
}

// Duplicated descriptors of every open socket, kept outside the channel lock
// so the manager can still shut them down when the loop stops responding.
// Shutting down a duplicate shuts down the socket it was taken from.
#[derive(Clone, Default)]
pub(crate) struct SocketHandles(Arc<Mutex<HashMap<Token, Socket>>>);

impl SocketHandles {

    fn track(&self, token: Token, socket: SockRef<'_>) {
        match socket.try_clone() {
            Ok(handle) => {
                self.0.lock().insert(token, handle);
            },
            Err(e) => tracing::warn!("unable to keep a handle for {:?}: {}", token, e),
        }
    }

    fn forget(&self, token: Token) {
        self.0.lock().remove(&token);
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    // Shuts down every socket still open, listener included, and lets go of
    // the handles. True only if every shutdown succeeded.
    pub fn shutdown_all(&self) -> bool {
        let mut closed = true;
        for (token, handle) in self.0.lock().drain() {
            match handle.shutdown(Shutdown::Both) {
                Ok(()) => {},
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {},
                Err(e) => {
                    tracing::error!("unable to force close {:?}: {}", token, e);
                    closed = false;
                },
            }
        }
        closed
    }
}

// Every socket the event loop owns. Only the loop thread touches this while
// the loop runs; the manager takes it over for forced closure on shutdown.
pub(crate) struct Channels {

    registry: Registry,

    handles: SocketHandles,

    server: Option<Server>,

    entries: HashMap<Token, Registration>,

    // Never reused, so a stale event cannot hit a newer socket.
    next_token: usize,

}

impl Channels {

    pub fn new(registry: Registry, handles: SocketHandles) -> Self {
        Self {
            registry,
            handles,
            server: None,
            entries: HashMap::new(),
            next_token: FIRST_CHANNEL,
        }
    }

    pub fn set_server(&mut self, listener: TcpListener, listeners: Arc<dyn ChannelListenerFactory>) {
        if let Some(mut old) = self.server.take() {
            if old.registered {
                self.registry.deregister(&mut old.listener).ok();
            }
        }
        self.handles.track(LISTENER, SockRef::from(&listener));
        self.server = Some(Server {
            listener,
            attachment: AcceptAttachment { listeners },
            registered: false,
        });
    }

    pub fn register_server(&mut self) -> io::Result<()> {
        match &mut self.server {
            Some(server) if !server.registered => {
                self.registry.register(&mut server.listener, LISTENER, Interest::READABLE)?;
                server.registered = true;
                Ok(())
            },
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no listening socket")),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_valid(&self, token: Token) -> bool {
        if token == LISTENER {
            return self.server.is_some();
        }
        self.entries.get(&token).is_some_and(Registration::is_valid)
    }

    pub fn get(&self, token: Token) -> Option<&Registration> {
        self.entries.get(&token).filter(|reg| reg.valid)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Registration> {
        self.entries.get_mut(&token).filter(|reg| reg.valid)
    }

    pub fn is_connecting(&self, token: Token) -> bool {
        matches!(self.get(token), Some(Registration { attachment: Attachment::Connect(_), .. }))
    }

    pub fn is_established(&self, token: Token) -> bool {
        matches!(self.get(token), Some(Registration { attachment: Attachment::Read(_), .. }))
    }

    pub fn has_pending_write(&self, token: Token) -> bool {
        self.get(token).is_some_and(|reg| reg.attachment.has_pending_write())
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.entries
            .iter()
            .filter(|(_, reg)| reg.valid)
            .map(|(token, _)| *token)
            .collect()
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.server {
            Some(server) => server.listener.accept(),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no listening socket")),
        }
    }

    // Starts a non-blocking connect. Failures are reported to the task's
    // listener straight away.
    pub fn register_connect(&mut self, task: ConnectTask, now: Instant) -> Option<ChannelId> {
        let token = self.next_token();
        let channel = Channel {
            id: ChannelId(token.0),
            peer: task.address,
            direction: Direction::Outbound,
            peer_id: task.peer_id,
        };
        let listener = task.listener;

        let mut stream = match TcpStream::connect(task.address) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!("connect to {} failed: {}", task.address, e);
                refuse(&channel, listener, ConnectionError::Io(e));
                return None;
            },
        };
        if let Err(e) = self.registry.register(&mut stream, token, Interest::WRITABLE) {
            tracing::debug!("unable to register connect to {}: {}", task.address, e);
            refuse(&channel, listener, ConnectionError::Io(e));
            return None;
        }
        self.handles.track(token, SockRef::from(&stream));

        tracing::trace!("connecting to {} as {}", task.address, channel.id);
        self.entries.insert(token, Registration {
            stream,
            interest: Interest::WRITABLE,
            attachment: Attachment::Connect(ConnectAttachment {
                channel,
                listener: Some(listener),
                deadline: now.checked_add(task.timeout),
            }),
            valid: true,
        });
        Some(channel.id)
    }

    // Registers an accepted socket for reading and tells its listener.
    pub fn register_inbound(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
        now: Instant,
    ) -> io::Result<ChannelId> {
        let token = self.next_token();
        let channel = Channel {
            id: ChannelId(token.0),
            peer,
            direction: Direction::Inbound,
            peer_id: None,
        };
        let Some(server) = &self.server else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no listening socket"));
        };
        let mut listener = None;
        notify("factory", channel.id, || {
            listener = Some(server.attachment.listeners.create_listener(&channel));
        });
        let Some(listener) = listener else {
            return Err(io::Error::new(io::ErrorKind::Other, "listener factory panicked"));
        };
        self.registry.register(&mut stream, token, Interest::READABLE)?;

        let mut attachment = ReadAttachment::new(channel, Some(listener), now);
        if !attachment.connected() {
            self.registry.deregister(&mut stream).ok();
            return Err(io::Error::new(io::ErrorKind::Other, "listener panicked on connect"));
        }
        self.handles.track(token, SockRef::from(&stream));
        self.entries.insert(token, Registration {
            stream,
            interest: Interest::READABLE,
            attachment: Attachment::Read(attachment),
            valid: true,
        });
        Ok(channel.id)
    }

    // Swaps a completed connect over to an established, readable channel.
    pub fn establish(&mut self, token: Token, now: Instant) -> io::Result<()> {
        let Some(reg) = self.entries.get_mut(&token).filter(|reg| reg.valid) else {
            return Ok(());
        };
        let (channel, listener) = match &mut reg.attachment {
            Attachment::Connect(connect) => (connect.channel, connect.listener.take()),
            Attachment::Read(_) => return Ok(()),
        };
        reg.attachment = Attachment::Read(ReadAttachment::new(channel, listener, now));
        self.registry.reregister(&mut reg.stream, token, Interest::READABLE)?;
        reg.interest = Interest::READABLE;
        if let Attachment::Read(read) = &mut reg.attachment {
            if !read.connected() {
                return Err(io::Error::new(io::ErrorKind::Other, "listener panicked on connect"));
            }
        }
        Ok(())
    }

    // Queues the payload behind anything already pending on the channel and
    // makes sure the loop hears about writability.
    pub fn enqueue_write(&mut self, task: WriteTask) {
        let token = Token(task.channel.0);
        let reg = match self.entries.get_mut(&token) {
            Some(reg) if reg.valid => reg,
            _ => return reject_write(task),
        };
        let Attachment::Read(read) = &mut reg.attachment else {
            return reject_write(task);
        };
        read.pending.push_back(PendingWrite::from(task));

        if !reg.interest.is_writable() {
            let interest = Interest::READABLE | Interest::WRITABLE;
            if let Err(e) = self.registry.reregister(&mut reg.stream, token, interest) {
                tracing::debug!("unable to add write interest on {}: {}", read.channel.id, e);
                self.close(token, ConnectionError::Io(e));
                return;
            }
            reg.interest = interest;
        }
    }

    pub fn clear_write_interest(&mut self, token: Token) -> io::Result<()> {
        if let Some(reg) = self.entries.get_mut(&token).filter(|reg| reg.valid) {
            if reg.interest.is_writable() {
                self.registry.reregister(&mut reg.stream, token, Interest::READABLE)?;
                reg.interest = Interest::READABLE;
            }
        }
        Ok(())
    }

    // mio only reports edges. Re-registering makes it report readiness again
    // on the next select for work left over from this cycle.
    pub fn rearm(&mut self, token: Token) {
        if let Some(reg) = self.entries.get_mut(&token).filter(|reg| reg.valid) {
            if let Err(e) = self.registry.reregister(&mut reg.stream, token, reg.interest) {
                tracing::debug!("unable to rearm {}: {}", reg.attachment.channel().id, e);
            }
        }
    }

    pub fn rearm_pending_write(&mut self, token: Token) {
        let pending = self
            .get(token)
            .is_some_and(|reg| reg.interest.is_writable() && reg.attachment.has_pending_write());
        if pending {
            self.rearm(token);
        }
    }

    // Closes a channel and tells its listener why. Repeated calls are no-ops
    // apart from notifying a listener that has not heard yet.
    pub fn close(&mut self, token: Token, error: ConnectionError) {
        let Some(reg) = self.entries.get_mut(&token) else {
            return;
        };
        if reg.valid {
            reg.valid = false;
            self.handles.forget(token);
            if let Err(e) = release(&self.registry, reg) {
                tracing::debug!("error closing {}: {}", reg.attachment.channel().id, e);
            }
            tracing::debug!("closed {} ({}): {}", reg.attachment.channel().id, reg.attachment.channel().peer, error);
        }
        reg.attachment.fail(&error);
    }

    // Closes without calling back into the listener. Queued writes fail as
    // cancelled.
    pub fn close_silently(&mut self, token: Token) {
        if let Some(reg) = self.entries.get_mut(&token) {
            if reg.valid {
                reg.valid = false;
                self.handles.forget(token);
                release(&self.registry, reg).ok();
            }
            reg.attachment.discard();
        }
    }

    // Drops closed entries, which closes their sockets.
    pub fn purge(&mut self) {
        self.entries.retain(|_, reg| reg.valid);
    }

    // Closes the listener and every channel, attempting all of them whatever
    // fails along the way. True only if everything closed cleanly.
    pub fn close_all(&mut self) -> bool {
        let mut closed = true;

        if let Some(mut server) = self.server.take() {
            self.handles.forget(LISTENER);
            if server.registered {
                if let Err(e) = self.registry.deregister(&mut server.listener) {
                    tracing::error!("unable to close server socket: {}", e);
                    closed = false;
                }
            }
        }

        for (token, mut reg) in self.entries.drain() {
            if reg.valid {
                reg.valid = false;
                self.handles.forget(token);
                if let Err(e) = release(&self.registry, &mut reg) {
                    tracing::error!("unable to close socket channel {}: {}", reg.attachment.channel().peer, e);
                    closed = false;
                }
            }
            reg.attachment.fail(&ConnectionError::Shutdown);
        }

        closed
    }
}

fn release(registry: &Registry, reg: &mut Registration) -> io::Result<()> {
    let deregistered = registry.deregister(&mut reg.stream);
    match reg.stream.shutdown(Shutdown::Both) {
        Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
        _ => {},
    }
    deregistered
}

fn reject_write(task: WriteTask) {
    tracing::debug!("write for unknown channel {}", task.channel);
    let (id, mut listener) = (task.channel, task.listener);
    notify("write failed", id, || listener.on_write_failed(id, &ConnectionError::UnknownChannel));
}

fn refuse(channel: &Channel, mut listener: Box<dyn ConnectionListener>, error: ConnectionError) {
    notify("error", channel.id, || listener.on_error(channel, &error));
}
