use std::time::{Duration, Instant};
use super::{attachment::Attachment, channels::Channels, ConnectionError};

// Closes every channel that has been quiet for longer than `idle_timeout`,
// and every connect still pending past its deadline. Returns how many were
// closed. Runs on the event loop thread between dispatch phases, so a channel
// is never closed halfway through a read or write.
pub(crate) fn sweep(channels: &mut Channels, idle_timeout: Duration, now: Instant) -> usize {
    let mut expired = Vec::new();
    for token in channels.tokens() {
        let Some(reg) = channels.get(token) else {
            continue;
        };
        match &reg.attachment {
            Attachment::Connect(connect) if connect.deadline.is_some_and(|deadline| now >= deadline) => {
                expired.push((token, ConnectionError::ConnectTimeout));
            },
            Attachment::Read(read) if now.saturating_duration_since(read.last_activity) > idle_timeout => {
                expired.push((token, ConnectionError::IdleTimeout));
            },
            _ => {},
        }
    }

    let count = expired.len();
    for (token, error) in expired {
        channels.close(token, error);
    }
    if count > 0 {
        tracing::debug!("cleanup closed {} of {} channels", count, channels.len());
    }
    count
}
