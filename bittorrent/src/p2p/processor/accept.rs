use std::{io, sync::Arc, time::Instant};
use crate::p2p::{
    channels::{Channels, LISTENER},
    settings::Settings,
    AdmissionPolicy, ConnectionError,
};
use super::{KeyProcessor, ReadyKey};

pub(crate) struct AcceptableKeyProcessor {

    settings: Arc<Settings>,

    policy: Arc<dyn AdmissionPolicy>,

}

impl AcceptableKeyProcessor {
    pub fn new(settings: Arc<Settings>, policy: Arc<dyn AdmissionPolicy>) -> Self {
        Self { settings, policy }
    }
}

impl KeyProcessor for AcceptableKeyProcessor {

    fn name(&self) -> &'static str {
        "accept"
    }

    fn matches(&self, key: &ReadyKey, _channels: &Channels) -> bool {
        key.token == LISTENER && key.readable
    }

    // Accepts until the backlog is empty. Problems with one accepted socket
    // only drop that socket; the listener itself is never closed from here.
    fn process(&mut self, _key: &ReadyKey, channels: &mut Channels) -> Result<(), ConnectionError> {
        loop {
            let (stream, peer) = match channels.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    return Ok(());
                },
            };

            if !self.policy.allow_new_connection() {
                tracing::debug!("new incoming connection from {} rejected", peer);
                continue;
            }
            if let Err(e) = self.settings.configure(&stream) {
                tracing::debug!("unable to configure socket for {}: {}", peer, e);
                continue;
            }
            match channels.register_inbound(stream, peer, Instant::now()) {
                Ok(id) => tracing::debug!("accepted {} as {}", peer, id),
                Err(e) => tracing::debug!("unable to register {}: {}", peer, e),
            }
        }
    }
}
