use std::{io, sync::Arc, time::Instant};
use crate::p2p::{channels::Channels, settings::Settings, AdmissionPolicy, ConnectionError};
use super::{KeyProcessor, ReadyKey};

pub(crate) struct ConnectableKeyProcessor {

    settings: Arc<Settings>,

    policy: Arc<dyn AdmissionPolicy>,

}

impl ConnectableKeyProcessor {
    pub fn new(settings: Arc<Settings>, policy: Arc<dyn AdmissionPolicy>) -> Self {
        Self { settings, policy }
    }
}

impl KeyProcessor for ConnectableKeyProcessor {

    fn name(&self) -> &'static str {
        "connect"
    }

    fn matches(&self, key: &ReadyKey, channels: &Channels) -> bool {
        (key.writable || key.error || key.write_closed) && channels.is_connecting(key.token)
    }

    fn process(&mut self, key: &ReadyKey, channels: &mut Channels) -> Result<(), ConnectionError> {
        let Some(reg) = channels.get(key.token) else {
            return Ok(());
        };

        if let Some(e) = reg.stream.take_error()? {
            return Err(e.into());
        }
        // Not connected yet means the event was spurious; another one follows.
        match reg.stream.peer_addr() {
            Ok(_) => {},
            Err(e) if e.kind() == io::ErrorKind::NotConnected => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let peer = reg.attachment.channel().peer;
        if !self.policy.allow_new_connection() {
            tracing::debug!("new outgoing connection to {} rejected", peer);
            return Err(ConnectionError::Rejected);
        }
        self.settings.configure(&reg.stream)?;

        channels.establish(key.token, Instant::now())?;
        tracing::debug!("connected to {}", peer);
        Ok(())
    }
}
