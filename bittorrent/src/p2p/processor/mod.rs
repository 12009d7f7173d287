use std::sync::Arc;
use mio::{event::Event, Token};
use super::{channels::Channels, settings::Settings, AdmissionPolicy, ConnectionError};

mod accept;
mod connect;
mod invalid;
mod read;
mod write;

pub(crate) use accept::AcceptableKeyProcessor;
pub(crate) use connect::ConnectableKeyProcessor;
pub(crate) use invalid::InvalidKeyProcessor;
pub(crate) use read::ReadableKeyProcessor;
#[cfg(test)]
pub(crate) use read::MAX_READS_PER_EVENT;
pub(crate) use write::WritableKeyProcessor;

// Readiness of one token as reported by a single select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadyKey {

    pub token: Token,

    pub readable: bool,

    pub writable: bool,

    pub error: bool,

    pub read_closed: bool,

    pub write_closed: bool,

}

impl From<&Event> for ReadyKey {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            error: event.is_error(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
        }
    }
}

/// Handles exactly one kind of readiness.
///
/// `process` must not block. An `Err` closes the key's channel and is passed
/// to its listener.
pub(crate) trait KeyProcessor: Send {

    fn name(&self) -> &'static str;

    fn matches(&self, key: &ReadyKey, channels: &Channels) -> bool;

    fn process(&mut self, key: &ReadyKey, channels: &mut Channels) -> Result<(), ConnectionError>;

}

// Priority order: invalid keys are caught before any protocol handling.
pub(crate) fn chain(
    settings: Arc<Settings>,
    incoming: Arc<dyn AdmissionPolicy>,
    outgoing: Arc<dyn AdmissionPolicy>,
    read_buffer_size: usize,
) -> Vec<Box<dyn KeyProcessor>> {
    vec![
        Box::new(InvalidKeyProcessor),
        Box::new(AcceptableKeyProcessor::new(settings.clone(), incoming)),
        Box::new(ConnectableKeyProcessor::new(settings, outgoing)),
        Box::new(ReadableKeyProcessor::new(read_buffer_size)),
        Box::new(WritableKeyProcessor),
    ]
}
