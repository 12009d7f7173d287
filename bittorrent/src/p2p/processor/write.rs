use std::{io::{self, Write}, time::Instant};
use bytes::Buf;
use crate::p2p::{attachment::Attachment, channels::Channels, ConnectionError};
use super::{KeyProcessor, ReadyKey};

pub(crate) struct WritableKeyProcessor;

impl KeyProcessor for WritableKeyProcessor {

    fn name(&self) -> &'static str {
        "write"
    }

    fn matches(&self, key: &ReadyKey, channels: &Channels) -> bool {
        key.writable && channels.has_pending_write(key.token)
    }

    // Writes as much as the socket takes. Each write's listener hears once its
    // bytes are all out; write interest is dropped when the queue empties.
    fn process(&mut self, key: &ReadyKey, channels: &mut Channels) -> Result<(), ConnectionError> {
        let Some(reg) = channels.get_mut(key.token) else {
            return Ok(());
        };
        let Attachment::Read(attachment) = &mut reg.attachment else {
            return Ok(());
        };

        loop {
            attachment.complete_flushed();
            let Some(front) = attachment.pending.front_mut() else {
                break;
            };
            match reg.stream.write(front.data.chunk()) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    front.data.advance(n);
                    attachment.touch(Instant::now());
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        channels.clear_write_interest(key.token)?;
        Ok(())
    }
}
