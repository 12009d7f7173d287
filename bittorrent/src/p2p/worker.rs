use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{atomic::{AtomicU8, Ordering}, Arc},
    time::{Duration, Instant},
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use mio::{Events, Poll, Waker};
use parking_lot::Mutex;
use super::{
    channels::{Channels, Registration, WAKER},
    cleanup,
    processor::{KeyProcessor, ReadyKey},
    queue::{self, QueueRx, QueueTx},
    settings::Settings,
    ConnectTask, WriteTask,
};

// Shared between the manager and the worker thread. `None` once the manager
// has force closed everything.
pub(crate) type SharedChannels = Arc<Mutex<Option<Channels>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    StopRequested,
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            2 => WorkerState::StopRequested,
            _ => WorkerState::Stopped,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Control {

    state: AtomicU8,

}

impl Control {

    pub fn new() -> Self {
        Self { state: AtomicU8::new(WorkerState::Created as u8) }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn enter_running(&self) -> bool {
        self.state
            .compare_exchange(
                WorkerState::Created as u8,
                WorkerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    // Honoured at the top of the next cycle; a select in progress finishes first.
    pub fn request_stop(&self) {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                match WorkerState::from_u8(state) {
                    WorkerState::Created | WorkerState::Running => Some(WorkerState::StopRequested as u8),
                    _ => None,
                }
            })
            .ok();
    }

    fn set_stopped(&self) {
        self.state.store(WorkerState::Stopped as u8, Ordering::Release);
    }
}

// Marks the worker stopped however the loop ends, unwinding included.
pub(crate) struct StopGuard(pub Arc<Control>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.set_stopped();
    }
}

// Runs the select/dispatch/sweep cycle on a single thread until stopped.
pub(crate) struct EventLoopWorker {

    poll: Poll,

    events: Events,

    channels: SharedChannels,

    // Tried in order, first match wins.
    processors: Vec<Box<dyn KeyProcessor>>,

    connects: QueueRx<ConnectTask>,

    writes: QueueRx<WriteTask>,

    settings: Arc<Settings>,

    control: Arc<Control>,

    last_sweep: Instant,

    // Signalled once the selector has been dropped.
    done_tx: Sender<()>,

}

// The caller side of a worker: task submission and stop.
pub(crate) struct WorkerHandle {

    connects: QueueTx<ConnectTask>,

    writes: QueueTx<WriteTask>,

    waker: Arc<Waker>,

    control: Arc<Control>,

    done_rx: Receiver<()>,

}

pub(crate) struct WorkerParams {

    pub poll: Poll,

    pub channels: SharedChannels,

    pub processors: Vec<Box<dyn KeyProcessor>>,

    pub settings: Arc<Settings>,

    pub queue_capacity: usize,

    pub max_events: usize,

}

impl EventLoopWorker {

    pub fn new(params: WorkerParams) -> io::Result<(Self, WorkerHandle)> {
        let waker = Arc::new(Waker::new(params.poll.registry(), WAKER)?);
        let (connect_tx, connect_rx) = queue::bounded(params.queue_capacity);
        let (write_tx, write_rx) = queue::bounded(params.queue_capacity);
        let (done_tx, done_rx) = channel::bounded(1);
        let control = Arc::new(Control::new());

        Ok((
            EventLoopWorker {
                poll: params.poll,
                events: Events::with_capacity(params.max_events.max(1)),
                channels: params.channels,
                processors: params.processors,
                connects: connect_rx,
                writes: write_rx,
                settings: params.settings,
                control: control.clone(),
                last_sweep: Instant::now(),
                done_tx,
            },
            WorkerHandle {
                connects: connect_tx,
                writes: write_tx,
                waker,
                control,
                done_rx,
            },
        ))
    }

    pub fn run(mut self) {
        let _stopped = StopGuard(self.control.clone());
        if self.control.enter_running() {
            tracing::debug!("connection worker started");
            while self.control.state() == WorkerState::Running {
                if let Err(e) = self.cycle() {
                    tracing::error!("selector failed, stopping connection worker: {}", e);
                    break;
                }
            }
        }
        self.control.set_stopped();

        let Self { poll, done_tx, .. } = self;
        drop(poll);
        tracing::debug!("connection worker stopped");
        done_tx.send(()).ok();
    }

    fn cycle(&mut self) -> io::Result<()> {
        let Self {
            poll,
            events,
            channels,
            processors,
            connects,
            writes,
            settings,
            control,
            last_sweep,
            ..
        } = self;

        {
            let mut guard = channels.lock();
            let Some(channels) = guard.as_mut() else {
                control.request_stop();
                return Ok(());
            };
            let now = Instant::now();
            for task in connects.drain() {
                channels.register_connect(task, now);
            }
            for task in writes.drain() {
                channels.enqueue_write(task);
            }
            channels.purge();
        }

        match poll.poll(events, Some(settings.select_timeout())) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut guard = channels.lock();
        let Some(channels) = guard.as_mut() else {
            control.request_stop();
            return Ok(());
        };
        for event in events.iter() {
            if event.token() == WAKER {
                continue;
            }
            dispatch(processors, &ReadyKey::from(event), channels);
        }
        channels.purge();

        let now = Instant::now();
        if now.saturating_duration_since(*last_sweep) >= settings.cleanup_interval() {
            cleanup::sweep(channels, settings.idle_timeout.get(), now);
            channels.purge();
            *last_sweep = now;
        }
        Ok(())
    }
}

// Hands the key to the first processor that claims it. Whatever goes wrong
// stays with that key's channel.
pub(crate) fn dispatch(processors: &mut [Box<dyn KeyProcessor>], key: &ReadyKey, channels: &mut Channels) {
    let Some(processor) = processors.iter_mut().find(|p| p.matches(key, channels)) else {
        tracing::trace!("no processor for {:?}", key);
        return;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| processor.process(key, channels))) {
        Ok(Ok(())) => {
            if key.writable {
                channels.rearm_pending_write(key.token);
            }
            debug_assert!(channels.get(key.token).map_or(true, Registration::role_matches_interest));
        },
        Ok(Err(e)) => {
            tracing::debug!("{} processor failed on {:?}: {}", processor.name(), key.token, e);
            channels.close(key.token, e);
        },
        Err(_) => {
            tracing::error!("{} processor panicked, dropping {:?}", processor.name(), key.token);
            channels.close_silently(key.token);
        },
    }
}

impl WorkerHandle {

    pub fn state(&self) -> WorkerState {
        self.control.state()
    }

    fn accepting(&self) -> bool {
        matches!(self.state(), WorkerState::Created | WorkerState::Running)
    }

    pub fn offer_connect(&self, task: ConnectTask, timeout: Duration) -> bool {
        if !self.accepting() {
            return false;
        }
        let queued = self.connects.offer(task, timeout);
        if queued {
            self.wake();
        }
        queued
    }

    pub fn offer_write(&self, task: WriteTask, timeout: Duration) -> bool {
        if !self.accepting() {
            return false;
        }
        let queued = self.writes.offer(task, timeout);
        if queued {
            self.wake();
        }
        queued
    }

    // Asks the loop to stop and interrupts a select in progress.
    pub fn stop(&self) {
        self.control.request_stop();
        self.wake();
    }

    pub fn await_termination(&self, timeout: Duration) -> bool {
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            tracing::warn!("unable to wake connection worker: {}", e);
        }
    }
}
