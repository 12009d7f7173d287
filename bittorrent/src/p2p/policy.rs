use std::{
    sync::{atomic::{AtomicU64, AtomicUsize, Ordering}, Arc},
    time::Duration,
};

/// Decides whether one more connection may be admitted right now.
///
/// Asked every time a socket is about to be admitted (after accept, or after
/// an outbound connect completes) and never cached, so implementations may
/// depend on counters that change under them.
pub trait AdmissionPolicy: Send + Sync {

    fn allow_new_connection(&self) -> bool;

}

impl<F> AdmissionPolicy for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn allow_new_connection(&self) -> bool {
        self()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AdmissionPolicy for AllowAll {
    fn allow_new_connection(&self) -> bool {
        true
    }
}

// Caps admissions against a peer count maintained elsewhere.
#[derive(Debug, Clone)]
pub struct ConnectionLimit {

    current: Arc<AtomicUsize>,

    max: usize,

}

impl ConnectionLimit {

    pub fn new(current: Arc<AtomicUsize>, max: usize) -> Self {
        Self { current, max }
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

impl AdmissionPolicy for ConnectionLimit {
    fn allow_new_connection(&self) -> bool {
        self.current.load(Ordering::Relaxed) < self.max
    }
}

// Idle timeout shared between the sweep and whoever tunes it.
// Relaxed on purpose: the sweep may see a new value one cycle late.
#[derive(Debug, Clone)]
pub struct IdleTimeout(Arc<AtomicU64>);

impl IdleTimeout {

    pub fn new(timeout: Duration) -> Self {
        Self(Arc::new(AtomicU64::new(millis(timeout))))
    }

    pub fn get(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, timeout: Duration) {
        self.0.store(millis(timeout), Ordering::Relaxed);
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
