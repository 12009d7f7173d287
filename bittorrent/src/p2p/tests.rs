use std::{
    io::{Read, Write},
    net::{self, SocketAddr},
    sync::{atomic::AtomicUsize, Arc},
    thread,
    time::{Duration, Instant},
};
use crossbeam::channel::{self, Receiver, Sender};
use mio::{
    net::{TcpListener, TcpStream},
    Interest, Poll, Token,
};
use crate::Config;
use super::{
    channels::{Channels, SocketHandles, LISTENER},
    cleanup,
    processor::{self, KeyProcessor, ReadyKey},
    queue,
    settings::Settings,
    worker::{dispatch, Control, StopGuard},
    *,
};

#[derive(Debug, PartialEq, Eq)]
enum Seen {
    Connected(ChannelId),
    Data(ChannelId, Vec<u8>),
    Error(ChannelId, String),
}

struct Recorder(Sender<Seen>);

impl ConnectionListener for Recorder {

    fn on_connected(&mut self, channel: &Channel) {
        self.0.send(Seen::Connected(channel.id)).ok();
    }

    fn on_data(&mut self, channel: &Channel, data: &[u8]) {
        if data == b"panic" {
            panic!("listener blew up");
        }
        self.0.send(Seen::Data(channel.id, data.to_vec())).ok();
    }

    fn on_error(&mut self, channel: &Channel, error: &ConnectionError) {
        self.0.send(Seen::Error(channel.id, error.to_string())).ok();
    }
}

// Reports data like a recorder, then panics when told about a failure.
struct PanicsOnError(Sender<Seen>);

impl ConnectionListener for PanicsOnError {

    fn on_data(&mut self, channel: &Channel, data: &[u8]) {
        self.0.send(Seen::Data(channel.id, data.to_vec())).ok();
    }

    fn on_error(&mut self, _channel: &Channel, _error: &ConnectionError) {
        panic!("error listener blew up");
    }
}

struct RecorderFactory(Sender<Seen>);

impl ChannelListenerFactory for RecorderFactory {
    fn create_listener(&self, _channel: &Channel) -> Box<dyn ConnectionListener> {
        Box::new(Recorder(self.0.clone()))
    }
}

struct WriteRecorder(Sender<Result<ChannelId, String>>);

impl WriteListener for WriteRecorder {

    fn on_write_complete(&mut self, channel: ChannelId) {
        self.0.send(Ok(channel)).ok();
    }

    fn on_write_failed(&mut self, _channel: ChannelId, error: &ConnectionError) {
        self.0.send(Err(error.to_string())).ok();
    }
}

// Reports which of several writes finished, in completion order.
struct Tagged(Sender<usize>, usize);

impl WriteListener for Tagged {
    fn on_write_complete(&mut self, _channel: ChannelId) {
        self.0.send(self.1).ok();
    }
}

struct Fixture {

    poll: Poll,

    channels: Channels,

    handles: SocketHandles,

    // Where the server socket listens.
    address: SocketAddr,

    // Stands in for remote peers.
    peers: net::TcpListener,

    seen: Receiver<Seen>,

}

fn fixture() -> Fixture {
    let poll = Poll::new().unwrap();
    let handles = SocketHandles::default();
    let mut channels = Channels::new(poll.registry().try_clone().unwrap(), handles.clone());
    let (tx, seen) = channel::unbounded();
    let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let address = listener.local_addr().unwrap();
    channels.set_server(listener, Arc::new(RecorderFactory(tx)));
    channels.register_server().unwrap();
    let peers = net::TcpListener::bind("127.0.0.1:0").unwrap();
    Fixture { poll, channels, handles, address, peers, seen }
}

impl Fixture {

    // Registers the server half of a fresh loopback connection.
    fn inbound(&mut self, now: Instant) -> (net::TcpStream, Token) {
        let client = net::TcpStream::connect(self.peers.local_addr().unwrap()).unwrap();
        let (server, peer) = self.peers.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let id = self.channels.register_inbound(TcpStream::from_std(server), peer, now).unwrap();
        (client, Token(id.0))
    }

    fn drain_seen(&self) -> Vec<Seen> {
        self.seen.try_iter().collect()
    }
}

fn id(token: Token) -> ChannelId {
    ChannelId(token.0)
}

fn chain() -> Vec<Box<dyn KeyProcessor>> {
    chain_with_buffer(1024)
}

fn chain_with_buffer(read_buffer_size: usize) -> Vec<Box<dyn KeyProcessor>> {
    let settings = Arc::new(Settings::new(&Config::default()));
    processor::chain(settings, Arc::new(AllowAll), Arc::new(AllowAll), read_buffer_size)
}

fn key(token: Token, readable: bool, writable: bool) -> ReadyKey {
    ReadyKey {
        token,
        readable,
        writable,
        error: false,
        read_closed: false,
        write_closed: false,
    }
}

fn first_match(processors: &[Box<dyn KeyProcessor>], key: &ReadyKey, channels: &Channels) -> Option<&'static str> {
    processors.iter().find(|p| p.matches(key, channels)).map(|p| p.name())
}

// Dispatches read events for `token` until `len` bytes have been delivered.
fn receive(fx: &mut Fixture, processors: &mut [Box<dyn KeyProcessor>], token: Token, len: usize) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut received = Vec::new();
    while received.len() < len && Instant::now() < deadline {
        dispatch(processors, &key(token, true, false), &mut fx.channels);
        received.extend(delivered(fx, token));
    }
    received
}

fn delivered(fx: &Fixture, token: Token) -> Vec<u8> {
    let mut data = Vec::new();
    for seen in fx.drain_seen() {
        match seen {
            Seen::Data(channel, chunk) if channel == id(token) => data.extend(chunk),
            other => panic!("unexpected {:?}", other),
        }
    }
    data
}

#[test]
fn queue_with_room_accepts_promptly() {
    let (tx, rx) = queue::bounded(2);
    let start = Instant::now();
    assert!(tx.offer(1, Duration::from_secs(5)));
    assert!(tx.offer(2, Duration::from_secs(5)));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(rx.drain().collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn full_queue_rejects_after_timeout() {
    let (tx, rx) = queue::bounded(1);
    assert!(tx.offer(1, Duration::ZERO));

    let start = Instant::now();
    assert!(!tx.offer(2, Duration::from_millis(100)));
    assert!(start.elapsed() >= Duration::from_millis(100));

    // Draining frees room again.
    assert_eq!(rx.drain().count(), 1);
    assert!(tx.offer(3, Duration::ZERO));
}

#[test]
fn zero_capacity_queue_is_always_full() {
    let (tx, rx) = queue::bounded(0);
    let start = Instant::now();
    assert!(!tx.offer(1, Duration::from_millis(100)));
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(rx.drain().count(), 0);
}

#[test]
fn idle_timeout_is_shared() {
    let timeout = IdleTimeout::new(Duration::from_secs(120));
    let copy = timeout.clone();
    copy.set(Duration::from_millis(1500));
    assert_eq!(timeout.get(), Duration::from_millis(1500));
}

#[test]
fn connection_limit() {
    let current = Arc::new(AtomicUsize::new(0));
    let limit = ConnectionLimit::new(current.clone(), 2);
    assert!(limit.allow_new_connection());
    current.store(2, std::sync::atomic::Ordering::Relaxed);
    assert!(!limit.allow_new_connection());
    assert_eq!(limit.max(), 2);
}

#[test]
fn sweep_closes_idle_channels_once() {
    let mut fx = fixture();
    let start = Instant::now();
    let (_idle_client, idle) = fx.inbound(start);
    let (_busy_client, busy) = fx.inbound(start + Duration::from_secs(90));
    fx.drain_seen();

    let now = start + Duration::from_secs(100);
    assert_eq!(cleanup::sweep(&mut fx.channels, Duration::from_secs(60), now), 1);
    assert!(!fx.channels.is_valid(idle));
    assert!(fx.channels.is_valid(busy));
    assert_eq!(fx.drain_seen(), vec![Seen::Error(id(idle), ConnectionError::IdleTimeout.to_string())]);

    // Closing again or sweeping again tells nobody anything.
    fx.channels.close(idle, ConnectionError::Cancelled);
    fx.channels.purge();
    assert_eq!(cleanup::sweep(&mut fx.channels, Duration::from_secs(60), now), 0);
    assert!(fx.drain_seen().is_empty());
    assert_eq!(fx.channels.len(), 1);
}

#[test]
fn sweep_expires_pending_connects() {
    let mut fx = fixture();
    let (tx, rx) = channel::unbounded();
    let start = Instant::now();
    let task = ConnectTask::new(fx.peers.local_addr().unwrap(), Recorder(tx))
        .with_timeout(Duration::from_secs(5));
    let channel = fx.channels.register_connect(task, start).unwrap();

    assert_eq!(cleanup::sweep(&mut fx.channels, Duration::from_secs(600), start + Duration::from_secs(4)), 0);
    assert_eq!(cleanup::sweep(&mut fx.channels, Duration::from_secs(600), start + Duration::from_secs(5)), 1);
    assert_eq!(
        rx.try_iter().collect::<Vec<_>>(),
        vec![Seen::Error(channel, ConnectionError::ConnectTimeout.to_string())],
    );
}

#[test]
fn interest_follows_role() {
    let mut fx = fixture();
    let (tx, _rx) = channel::unbounded();
    let task = ConnectTask::new(fx.peers.local_addr().unwrap(), Recorder(tx));
    let connecting = Token(fx.channels.register_connect(task, Instant::now()).unwrap().0);
    let reg = fx.channels.get(connecting).unwrap();
    assert_eq!(reg.interest, Interest::WRITABLE);
    assert!(reg.role_matches_interest());

    let (_client, inbound) = fx.inbound(Instant::now());
    let reg = fx.channels.get(inbound).unwrap();
    assert_eq!(reg.interest, Interest::READABLE);
    assert!(reg.role_matches_interest());

    let (wtx, _wrx) = channel::unbounded();
    fx.channels.enqueue_write(WriteTask::new(id(inbound), &b"hello"[..], WriteRecorder(wtx)));
    let reg = fx.channels.get(inbound).unwrap();
    assert!(reg.interest.is_writable());
    assert!(reg.role_matches_interest());
}

#[test]
fn write_to_unknown_or_connecting_channel_fails() {
    let mut fx = fixture();
    let (wtx, wrx) = channel::unbounded();
    fx.channels.enqueue_write(WriteTask::new(ChannelId(999), &b"x"[..], WriteRecorder(wtx.clone())));

    let (tx, _rx) = channel::unbounded();
    let task = ConnectTask::new(fx.peers.local_addr().unwrap(), Recorder(tx));
    let connecting = fx.channels.register_connect(task, Instant::now()).unwrap();
    fx.channels.enqueue_write(WriteTask::new(connecting, &b"x"[..], WriteRecorder(wtx)));

    let unknown = ConnectionError::UnknownChannel.to_string();
    assert_eq!(wrx.try_iter().collect::<Vec<_>>(), vec![Err(unknown.clone()), Err(unknown)]);
}

#[test]
fn close_all_attempts_every_channel() {
    let mut fx = fixture();
    let (_first_client, first) = fx.inbound(Instant::now());
    let (_second_client, second) = fx.inbound(Instant::now());
    let (_third_client, third) = fx.inbound(Instant::now());
    fx.drain_seen();

    // Deregistering behind the channel's back makes its close fail.
    let reg = fx.channels.get_mut(second).unwrap();
    fx.poll.registry().deregister(&mut reg.stream).unwrap();

    assert!(!fx.channels.close_all());
    assert_eq!(fx.channels.len(), 0);
    assert!(!fx.channels.is_valid(LISTENER));

    let mut seen = fx.drain_seen();
    seen.sort_by_key(|seen| match seen {
        Seen::Error(channel, _) => *channel,
        _ => ChannelId(0),
    });
    let shutdown = ConnectionError::Shutdown.to_string();
    assert_eq!(seen, vec![
        Seen::Error(id(first), shutdown.clone()),
        Seen::Error(id(second), shutdown.clone()),
        Seen::Error(id(third), shutdown),
    ]);
}

#[test]
fn processors_claim_keys_in_priority_order() {
    let mut fx = fixture();
    let processors = chain();

    assert_eq!(first_match(&processors, &key(Token(4242), true, true), &fx.channels), Some("invalid"));
    assert_eq!(first_match(&processors, &key(LISTENER, true, false), &fx.channels), Some("accept"));

    let (tx, _rx) = channel::unbounded();
    let task = ConnectTask::new(fx.peers.local_addr().unwrap(), Recorder(tx));
    let connecting = Token(fx.channels.register_connect(task, Instant::now()).unwrap().0);
    assert_eq!(first_match(&processors, &key(connecting, false, true), &fx.channels), Some("connect"));

    let (_client, inbound) = fx.inbound(Instant::now());
    assert_eq!(first_match(&processors, &key(inbound, false, true), &fx.channels), None);

    fx.channels.enqueue_write(WriteTask::new(id(inbound), &b"hello"[..], ()));
    assert_eq!(first_match(&processors, &key(inbound, true, true), &fx.channels), Some("read"));
    assert_eq!(first_match(&processors, &key(inbound, false, true), &fx.channels), Some("write"));

    fx.channels.close(inbound, ConnectionError::Cancelled);
    assert_eq!(first_match(&processors, &key(inbound, true, true), &fx.channels), Some("invalid"));
}

#[test]
fn dispatch_reads_and_writes() {
    let mut fx = fixture();
    let mut processors = chain();
    let (mut client, token) = fx.inbound(Instant::now());
    fx.drain_seen();

    client.write_all(b"hello").unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut received = Vec::new();
    while received.len() < 5 && Instant::now() < deadline {
        dispatch(&mut processors, &key(token, true, false), &mut fx.channels);
        for seen in fx.drain_seen() {
            match seen {
                Seen::Data(channel, data) if channel == id(token) => received.extend(data),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
    assert_eq!(received, b"hello");

    let (wtx, wrx) = channel::unbounded();
    fx.channels.enqueue_write(WriteTask::new(id(token), &b"world"[..], WriteRecorder(wtx)));
    dispatch(&mut processors, &key(token, false, true), &mut fx.channels);
    assert_eq!(wrx.try_recv().unwrap(), Ok(id(token)));
    assert!(!fx.channels.get(token).unwrap().interest.is_writable());

    let mut buf = [0; 5];
    std::io::Read::read_exact(&mut client, &mut buf).unwrap();
    assert_eq!(&buf, b"world");
}

#[test]
fn dispatch_closes_on_peer_eof() {
    let mut fx = fixture();
    let mut processors = chain();
    let (client, token) = fx.inbound(Instant::now());
    fx.drain_seen();
    drop(client);

    let deadline = Instant::now() + Duration::from_secs(5);
    while fx.channels.is_valid(token) && Instant::now() < deadline {
        dispatch(&mut processors, &key(token, true, false), &mut fx.channels);
    }
    assert_eq!(fx.drain_seen(), vec![Seen::Error(id(token), ConnectionError::ClosedByPeer.to_string())]);
}

#[test]
fn panicking_listener_only_loses_its_channel() {
    let mut fx = fixture();
    let mut processors = chain();
    let (mut bad_client, bad) = fx.inbound(Instant::now());
    let (mut good_client, good) = fx.inbound(Instant::now());
    fx.drain_seen();

    bad_client.write_all(b"panic").unwrap();
    good_client.write_all(b"fine").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    while (fx.channels.is_valid(bad) || seen.is_empty()) && Instant::now() < deadline {
        dispatch(&mut processors, &key(bad, true, false), &mut fx.channels);
        dispatch(&mut processors, &key(good, true, false), &mut fx.channels);
        seen.extend(fx.drain_seen());
    }

    assert!(!fx.channels.is_valid(bad));
    assert!(fx.channels.is_valid(good));
    assert_eq!(seen, vec![Seen::Data(id(good), b"fine".to_vec())]);
}

#[test]
fn invalid_key_for_unknown_token_is_harmless() {
    let mut fx = fixture();
    let mut processors = chain();
    dispatch(&mut processors, &key(Token(77), true, true), &mut fx.channels);
    assert!(fx.drain_seen().is_empty());
    assert!(fx.channels.is_valid(LISTENER));
}

#[test]
fn manager_requires_bind_before_start() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let listeners: Arc<dyn ChannelListenerFactory> = Arc::new(RecorderFactory(channel::unbounded().0));
    let mut manager = ConnectionManager::new(Config::default(), listeners).unwrap();
    assert!(matches!(manager.start(runtime.handle()), Err(ManagerError::NotBound)));
    assert_eq!(manager.state(), WorkerState::Created);

    let port = manager.bind(0..1).unwrap();
    assert_ne!(port, 0);
    assert_eq!(manager.bind_port(), Some(port));
    assert!(manager.shutdown(Duration::from_secs(1)));
    assert!(manager.is_closed());
}

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.port_range, 6881..6889);
    assert_eq!(config.select_timeout, Duration::from_secs(1));
    assert_eq!(config.idle_timeout, Duration::from_secs(120));
    assert_eq!(config.queue_capacity, 2000);
}

#[test]
fn connect_without_a_representable_deadline_never_expires() {
    let mut fx = fixture();
    let (tx, rx) = channel::unbounded();
    let start = Instant::now();
    let task = ConnectTask::new(fx.peers.local_addr().unwrap(), Recorder(tx))
        .with_timeout(Duration::MAX);
    let connecting = Token(fx.channels.register_connect(task, start).unwrap().0);
    assert!(fx.channels.is_connecting(connecting));

    let next_year = start + Duration::from_secs(365 * 24 * 60 * 60);
    assert_eq!(cleanup::sweep(&mut fx.channels, Duration::from_secs(60), next_year), 0);
    assert!(fx.channels.is_connecting(connecting));
    assert!(rx.try_iter().next().is_none());
}

#[test]
fn panicking_error_listener_does_not_stop_the_sweep() {
    let mut fx = fixture();
    let mut processors = chain();
    let start = Instant::now();
    let (tx, rx) = channel::unbounded();
    let task = ConnectTask::new(fx.peers.local_addr().unwrap(), PanicsOnError(tx))
        .with_timeout(Duration::from_secs(5));
    let connecting = Token(fx.channels.register_connect(task, start).unwrap().0);
    let (_idle_client, idle) = fx.inbound(start);
    let (mut busy_client, busy) = fx.inbound(start + Duration::from_secs(90));
    fx.drain_seen();

    assert_eq!(cleanup::sweep(&mut fx.channels, Duration::from_secs(60), start + Duration::from_secs(100)), 2);
    fx.channels.purge();
    assert!(!fx.channels.is_valid(connecting));
    assert!(!fx.channels.is_valid(idle));
    assert!(rx.try_iter().next().is_none());
    assert_eq!(fx.drain_seen(), vec![Seen::Error(id(idle), ConnectionError::IdleTimeout.to_string())]);

    busy_client.write_all(b"still here").unwrap();
    assert_eq!(receive(&mut fx, &mut processors, busy, 10), b"still here");
}

#[test]
fn panicking_write_listener_keeps_the_channel() {
    struct Explodes;

    impl WriteListener for Explodes {
        fn on_write_complete(&mut self, _channel: ChannelId) {
            panic!("write listener blew up");
        }

        fn on_write_failed(&mut self, _channel: ChannelId, _error: &ConnectionError) {
            panic!("write listener blew up");
        }
    }

    let mut fx = fixture();
    let mut processors = chain();
    let (mut client, token) = fx.inbound(Instant::now());
    fx.drain_seen();

    fx.channels.enqueue_write(WriteTask::new(ChannelId(999), &b"x"[..], Explodes));
    fx.channels.enqueue_write(WriteTask::new(id(token), &b"ok"[..], Explodes));
    dispatch(&mut processors, &key(token, false, true), &mut fx.channels);
    assert!(fx.channels.is_valid(token));
    assert!(!fx.channels.has_pending_write(token));

    let mut buf = [0; 2];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ok");
}

#[test]
fn worker_state_is_stopped_after_a_panic() {
    let control = Arc::new(Control::new());
    let guarded = control.clone();
    let result = thread::spawn(move || {
        let _stopped = StopGuard(guarded);
        panic!("event loop blew up");
    })
    .join();

    assert!(result.is_err());
    assert_eq!(control.state(), WorkerState::Stopped);
}

#[test]
fn queued_writes_are_cancelled_with_their_channel() {
    let mut fx = fixture();
    let mut processors = chain();
    let (mut client, token) = fx.inbound(Instant::now());
    let (_other_client, other) = fx.inbound(Instant::now());
    fx.drain_seen();

    let (wtx, wrx) = channel::unbounded();
    fx.channels.enqueue_write(WriteTask::new(id(token), &b"never sent"[..], WriteRecorder(wtx.clone())));
    fx.channels.enqueue_write(WriteTask::new(id(other), &b"never sent"[..], WriteRecorder(wtx)));

    client.write_all(b"panic").unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while fx.channels.is_valid(token) && Instant::now() < deadline {
        dispatch(&mut processors, &key(token, true, false), &mut fx.channels);
    }
    assert!(!fx.channels.is_valid(token));
    fx.channels.close_silently(other);

    let cancelled = ConnectionError::Cancelled.to_string();
    assert_eq!(wrx.try_iter().collect::<Vec<_>>(), vec![Err(cancelled.clone()), Err(cancelled)]);
    // Neither listener hears about it.
    assert!(fx.drain_seen().is_empty());
}

#[test]
fn large_write_spans_several_write_events() {
    let mut fx = fixture();
    let mut processors = chain();
    let (client, token) = fx.inbound(Instant::now());
    fx.drain_seen();

    let payload: Vec<u8> = (0..16 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let (wtx, wrx) = channel::unbounded();
    fx.channels.enqueue_write(WriteTask::new(id(token), payload.clone(), Tagged(wtx.clone(), 0)));
    fx.channels.enqueue_write(WriteTask::new(id(token), &b"tail"[..], Tagged(wtx, 1)));

    // Nobody reads yet, so the first event only fills the socket buffers.
    dispatch(&mut processors, &key(token, false, true), &mut fx.channels);
    assert!(wrx.try_recv().is_err());
    let reg = fx.channels.get(token).unwrap();
    assert!(reg.interest.is_writable());
    assert!(reg.role_matches_interest());

    let expected = payload.len() + 4;
    let reader = thread::spawn(move || {
        let mut client = client;
        let mut received = Vec::with_capacity(expected);
        let mut buf = [0; 0x10000];
        while received.len() < expected {
            match client.read(&mut buf).unwrap() {
                0 => break,
                n => received.extend_from_slice(&buf[..n]),
            }
        }
        received
    });

    let deadline = Instant::now() + Duration::from_secs(20);
    while fx.channels.has_pending_write(token) && Instant::now() < deadline {
        assert!(fx.channels.get(token).unwrap().interest.is_writable());
        dispatch(&mut processors, &key(token, false, true), &mut fx.channels);
    }
    assert_eq!(wrx.try_iter().collect::<Vec<_>>(), vec![0, 1]);
    assert!(!fx.channels.get(token).unwrap().interest.is_writable());

    let received = reader.join().unwrap();
    assert_eq!(received.len(), expected);
    assert!(received[..payload.len()] == payload[..]);
    assert_eq!(&received[payload.len()..], b"tail");
}

#[test]
fn reads_per_event_are_capped() {
    let mut fx = fixture();
    let mut processors = chain_with_buffer(16);
    let (mut client, token) = fx.inbound(Instant::now());
    fx.drain_seen();

    let sent: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
    client.write_all(&sent).unwrap();
    thread::sleep(Duration::from_millis(100));

    // Swallow the edge the data arrived with.
    let mut events = mio::Events::with_capacity(16);
    fx.poll.poll(&mut events, Some(Duration::from_millis(100))).unwrap();

    dispatch(&mut processors, &key(token, true, false), &mut fx.channels);
    let mut received = delivered(&fx, token);
    assert_eq!(received.len(), 16 * processor::MAX_READS_PER_EVENT);

    // Rearmed, so the rest is reported again without new data arriving.
    fx.poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
    assert!(events.iter().any(|event| event.token() == token && event.is_readable()));

    received.extend(receive(&mut fx, &mut processors, token, sent.len() - received.len()));
    assert_eq!(received, sent);
}

#[test]
fn socket_handles_reach_sockets_without_the_channels() {
    let mut fx = fixture();
    let (mut client, token) = fx.inbound(Instant::now());
    let (_closed_client, closed) = fx.inbound(Instant::now());
    assert_eq!(fx.handles.len(), 3);
    fx.channels.close(closed, ConnectionError::Cancelled);
    assert_eq!(fx.handles.len(), 2);

    assert!(fx.handles.shutdown_all());
    assert_eq!(fx.handles.len(), 0);

    // The channel is still on the books but its socket is finished.
    assert!(fx.channels.is_valid(token));
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = [0; 1];
    assert_eq!(client.read(&mut buf).unwrap(), 0);
    assert!(net::TcpStream::connect(fx.address).is_err());
}
