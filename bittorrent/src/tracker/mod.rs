//! Tracker-side bookkeeping: the torrents a tracker serves and batched
//! announce handling. HTTP serving itself lives outside this crate.

use std::{fmt, str::FromStr};
use url::Url;

mod multi;
mod torrents;

pub use multi::{
    failure_response, AnnounceHandler, AnnounceResponse, MultiAnnounce, STATUS_BAD_REQUEST,
    STATUS_INTERNAL_SERVER_ERROR, STATUS_OK,
};
pub use torrents::{AnnouncedPeer, TrackedPeer, TrackedTorrent, TrackedTorrents};

type Result<T> = std::result::Result<T, TrackerError>;

// Request path served by the announce handler.
pub const ANNOUNCE_PATH: &str = "/announce";

pub const DEFAULT_TRACKER_PORT: u16 = 6969;

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {

    #[error("bencode error: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unknown announce event: {0}")]
    UnknownEvent(String),

}

// http://host:port/announce
pub fn default_announce_url(host: &str, port: u16) -> Result<Url> {
    Ok(Url::parse(&format!("http://{}:{}{}", host, port, ANNOUNCE_PATH))?)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Event {

    Completed,

    #[default]
    Started,

    Stopped,

}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Completed => write!(f, "completed"),
            Event::Started => write!(f, "started"),
            Event::Stopped => write!(f, "stopped"),
        }
    }
}

impl FromStr for Event {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "completed" => Ok(Event::Completed),
            "started" => Ok(Event::Started),
            "stopped" => Ok(Event::Stopped),
            other => Err(TrackerError::UnknownEvent(other.to_string())),
        }
    }
}
