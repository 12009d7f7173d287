use crate::p2p::{channels::Channels, ConnectionError};
use super::{KeyProcessor, ReadyKey};

// Catches events for tokens that were closed earlier in the cycle or never
// existed, so they never reach protocol handling.
pub(crate) struct InvalidKeyProcessor;

impl KeyProcessor for InvalidKeyProcessor {

    fn name(&self) -> &'static str {
        "invalid"
    }

    fn matches(&self, key: &ReadyKey, channels: &Channels) -> bool {
        !channels.is_valid(key.token)
    }

    fn process(&mut self, key: &ReadyKey, channels: &mut Channels) -> Result<(), ConnectionError> {
        tracing::trace!("drop invalid key {:?}", key.token);
        // Keys only turn invalid through a close that already told everyone,
        // so nobody hears this Cancelled. It just makes sure the socket is gone.
        channels.close(key.token, ConnectionError::Cancelled);
        Ok(())
    }
}
