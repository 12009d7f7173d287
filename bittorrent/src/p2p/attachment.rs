use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};
use bytes::Bytes;
use super::{
    Channel, ChannelId, ChannelListenerFactory, ConnectionError, ConnectionListener, WriteListener, WriteTask,
};

// Every call into user code goes through here. A panicking callback is logged
// and reported as false; the caller decides what the channel loses.
pub(crate) fn notify(callback: &str, id: ChannelId, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(_) => {
            tracing::error!("{} listener for {} panicked", callback, id);
            false
        },
    }
}

// Bound to the listening socket.
pub(crate) struct AcceptAttachment {

    pub listeners: Arc<dyn ChannelListenerFactory>,

}

// Outbound socket whose connect has not completed yet.
pub(crate) struct ConnectAttachment {

    pub channel: Channel,

    pub listener: Option<Box<dyn ConnectionListener>>,

    // None when the timeout is too large to represent; such a connect only
    // ends when the socket does.
    pub deadline: Option<Instant>,

}

// Established socket, inbound or outbound.
pub(crate) struct ReadAttachment {

    pub channel: Channel,

    // Taken when the listener is told the channel failed, so it hears at most once.
    listener: Option<Box<dyn ConnectionListener>>,

    pub last_activity: Instant,

    // Flushed front to back.
    pub pending: VecDeque<PendingWrite>,

}

pub(crate) struct PendingWrite {

    pub data: Bytes,

    pub listener: Box<dyn WriteListener>,

}

impl From<WriteTask> for PendingWrite {
    fn from(task: WriteTask) -> Self {
        Self { data: task.data, listener: task.listener }
    }
}

impl ReadAttachment {

    pub fn new(channel: Channel, listener: Option<Box<dyn ConnectionListener>>, now: Instant) -> Self {
        Self {
            channel,
            listener,
            last_activity: now,
            pending: VecDeque::new(),
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    // False if the listener panicked, in which case it is dropped unheard.
    pub fn connected(&mut self) -> bool {
        self.call("connected", |listener, channel| listener.on_connected(channel))
    }

    // False if the listener panicked, in which case it is dropped unheard.
    pub fn deliver(&mut self, data: &[u8]) -> bool {
        self.call("data", |listener, channel| listener.on_data(channel, data))
    }

    fn call(&mut self, callback: &str, f: impl FnOnce(&mut Box<dyn ConnectionListener>, &Channel)) -> bool {
        let Some(listener) = &mut self.listener else {
            return true;
        };
        let channel = self.channel;
        if notify(callback, channel.id, || f(listener, &channel)) {
            return true;
        }
        self.listener = None;
        false
    }

    // Reports every finished write at the front of the queue.
    pub fn complete_flushed(&mut self) {
        while self.pending.front().is_some_and(|write| write.data.is_empty()) {
            if let Some(mut write) = self.pending.pop_front() {
                let id = self.channel.id;
                notify("write complete", id, || write.listener.on_write_complete(id));
            }
        }
    }

    fn fail_pending(&mut self, error: &ConnectionError) {
        let channel = self.channel;
        for mut write in self.pending.drain(..) {
            notify("write failed", channel.id, || write.listener.on_write_failed(channel.id, error));
        }
    }
}

pub(crate) enum Attachment {

    Connect(ConnectAttachment),

    Read(ReadAttachment),

}

impl Attachment {

    pub fn channel(&self) -> &Channel {
        match self {
            Attachment::Connect(connect) => &connect.channel,
            Attachment::Read(read) => &read.channel,
        }
    }

    pub fn has_pending_write(&self) -> bool {
        matches!(self, Attachment::Read(read) if !read.pending.is_empty())
    }

    // Tells every queued write, then the listener, that the channel is gone.
    // Returns false if there was nobody left to tell.
    pub fn fail(&mut self, error: &ConnectionError) -> bool {
        let (channel, listener) = match self {
            Attachment::Connect(connect) => (connect.channel, connect.listener.take()),
            Attachment::Read(read) => {
                read.fail_pending(error);
                (read.channel, read.listener.take())
            },
        };
        match listener {
            Some(mut listener) => {
                notify("error", channel.id, || listener.on_error(&channel, error));
                true
            },
            None => false,
        }
    }

    // Drops the listener without telling it anything. Queued writes still
    // hear that they were cancelled.
    pub fn discard(&mut self) {
        match self {
            Attachment::Connect(connect) => connect.listener = None,
            Attachment::Read(read) => {
                read.listener = None;
                read.fail_pending(&ConnectionError::Cancelled);
            },
        }
    }
}
