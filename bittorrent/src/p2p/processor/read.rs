use std::{io::{self, Read}, time::Instant};
use crate::p2p::{attachment::Attachment, channels::Channels, ConnectionError};
use super::{KeyProcessor, ReadyKey};

// Reads handled per event, so one busy peer cannot hold up the rest of the
// cycle. Whatever is left is picked up on the next select.
pub(crate) const MAX_READS_PER_EVENT: usize = 16;

pub(crate) struct ReadableKeyProcessor {

    buf: Vec<u8>,

}

impl ReadableKeyProcessor {
    pub fn new(read_buffer_size: usize) -> Self {
        Self { buf: vec![0; read_buffer_size.max(1)] }
    }
}

impl KeyProcessor for ReadableKeyProcessor {

    fn name(&self) -> &'static str {
        "read"
    }

    fn matches(&self, key: &ReadyKey, channels: &Channels) -> bool {
        (key.readable || key.read_closed) && channels.is_established(key.token)
    }

    // Reads until the socket would block or the cap is reached, handing each
    // chunk to the listener as it arrives. End of stream closes the channel,
    // and so does a listener that panics on the data.
    fn process(&mut self, key: &ReadyKey, channels: &mut Channels) -> Result<(), ConnectionError> {
        let Some(reg) = channels.get_mut(key.token) else {
            return Ok(());
        };
        let Attachment::Read(attachment) = &mut reg.attachment else {
            return Ok(());
        };

        let mut reads = 0;
        while reads < MAX_READS_PER_EVENT {
            match reg.stream.read(&mut self.buf) {
                Ok(0) => return Err(ConnectionError::ClosedByPeer),
                Ok(n) => {
                    reads += 1;
                    attachment.touch(Instant::now());
                    if !attachment.deliver(&self.buf[..n]) {
                        return Err(ConnectionError::Cancelled);
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        channels.rearm(key.token);
        Ok(())
    }
}
