use std::{thread, time::Duration};
use crossbeam::channel::{self, Receiver, Sender, SendTimeoutError};

// Bounded hand-off from caller threads to the event loop. Callers may block up
// to their own timeout; the loop only ever drains without blocking.
pub(crate) fn bounded<T>(capacity: usize) -> (QueueTx<T>, QueueRx<T>) {
    let (tx, rx) = channel::bounded(capacity);
    (QueueTx { tx, capacity }, QueueRx { rx })
}

#[derive(Debug)]
pub(crate) struct QueueTx<T> {

    tx: Sender<T>,

    capacity: usize,

}

impl<T> Clone for QueueTx<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), capacity: self.capacity }
    }
}

impl<T> QueueTx<T> {

    // False when the item could not be queued within `timeout`.
    pub fn offer(&self, item: T, timeout: Duration) -> bool {
        // A zero capacity queue never has room. crossbeam would treat it as a
        // rendezvous channel instead.
        if self.capacity == 0 {
            thread::sleep(timeout);
            return false;
        }
        match self.tx.send_timeout(item, timeout) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::debug!("queue full for {:?}, rejecting task", timeout);
                false
            },
            Err(SendTimeoutError::Disconnected(_)) => false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct QueueRx<T> {

    rx: Receiver<T>,

}

impl<T> QueueRx<T> {

    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.try_iter()
    }
}
